use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ApexConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub model: ModelConfig,
    pub embedding: EmbeddingConfig,
    pub memory: MemoryConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
    pub default_conversation: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Chat-completion backend used by the orchestrator and the fact extractor.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Cheaper model for background fact extraction.
    pub extraction_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"openai"` (remote `/embeddings`) or `"hashing"` (local, offline).
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// Conversation turns always included in context.
    pub recent_turns: usize,
    /// Maximum relevant facts per model call.
    pub max_facts: usize,
    pub min_score: f32,
    /// A new fact at least this similar to a stored one is not stored again.
    pub dedup_threshold: f32,
    pub extraction_queue_capacity: usize,
    /// Most recent turns sent to the fact extractor after each reply.
    pub extraction_window: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_tool_rounds: u32,
    pub tool_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            default_conversation: "default".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_apex_dir()
            .join("apex.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4o".into(),
            extraction_model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8000,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent_turns: 10,
            max_facts: 20,
            min_score: 0.2,
            dedup_threshold: 0.92,
            extraction_queue_capacity: 64,
            extraction_window: 4,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            tool_timeout_secs: 30,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OrchestratorConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Returns `~/.apex/`, or `./.apex/` when no home directory is known.
pub fn default_apex_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".apex")
}

/// Returns the default config file path: `~/.apex/config.toml`
pub fn default_config_path() -> PathBuf {
    default_apex_dir().join("config.toml")
}

impl ApexConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            ApexConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("APEX_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("APEX_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("APEX_MODEL") {
            self.model.model = val;
        }
        if let Ok(val) = std::env::var("APEX_EXTRACTION_MODEL") {
            self.model.extraction_model = val;
        }
        if let Ok(val) = std::env::var("APEX_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
        // One key serves both endpoints unless the file set them separately.
        if let Ok(val) = std::env::var("OPENAI_API_KEY") {
            if self.model.api_key.is_empty() {
                self.model.api_key = val.clone();
            }
            if self.embedding.api_key.is_empty() {
                self.embedding.api_key = val;
            }
        }
        if let Ok(val) = std::env::var("OPENAI_BASE_URL") {
            self.model.base_url = val.clone();
            self.embedding.base_url = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

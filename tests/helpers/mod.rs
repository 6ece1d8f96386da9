#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apex::config::MemoryConfig;
use apex::context::ContextBuilder;
use apex::db;
use apex::embedding::EmbeddingProvider;
use apex::error::{EmbeddingError, ModelError};
use apex::extractor::{ExtractionJob, ExtractionQueue};
use apex::memory::conversation::ConversationStore;
use apex::memory::knowledge::KnowledgeStore;
use apex::memory::{self, Db};
use apex::model::retry::RetryPolicy;
use apex::model::{ChatMessage, Completion, ModelClient, ToolCallRequest};
use apex::orchestrator::{Orchestrator, OrchestratorSettings};
use apex::tools::{self, RegistryBuilder, ToolSchema};
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::mpsc;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

pub fn shared_db() -> Db {
    memory::shared(test_db())
}

/// Generate a deterministic embedding with a spike at position `seed`.
/// Distinct seeds give orthogonal vectors.
pub fn spike(dims: usize, seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    v[seed % dims] = 1.0;
    v
}

/// Unit vector with the given cosine similarity to `spike(dims, 0)`.
pub fn at_angle(dims: usize, cosine: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    v[0] = cosine;
    v[1] = (1.0 - cosine * cosine).max(0.0).sqrt();
    v
}

/// Embedder with a fixed text → vector table. Unknown text is a provider error.
pub struct FixedEmbedder {
    dims: usize,
    model: String,
    table: Mutex<HashMap<String, Vec<f32>>>,
}

impl FixedEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            model: format!("fixed-{dims}"),
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn with(self, text: &str, vector: Vec<f32>) -> Self {
        self.table.lock().unwrap().insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.table
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::Provider(format!("no vector for {text:?}")))
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Embedder whose every call fails, like a provider outage.
pub struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Provider("HTTP 503".into()))
    }

    fn model_id(&self) -> &str {
        "down"
    }

    fn dimensions(&self) -> usize {
        8
    }
}

/// Model that replays a script of completions and records every message list
/// it was called with. Once the script runs out it repeats `fallback`.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Completion, ModelError>>>,
    fallback: Option<Completion>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Result<Completion, ModelError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            fallback: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn replies(texts: &[&str]) -> Arc<Self> {
        Self::new(texts.iter().map(|t| Ok(text(t))).collect())
    }

    pub fn repeating(completion: Completion) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(completion),
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(delay: Duration, completion: Completion) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(completion),
            delay: Some(delay),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSchema],
    ) -> Result<Completion, ModelError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(step) => step,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ModelError::InvalidResponse("script exhausted".into())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

pub fn text(s: &str) -> Completion {
    Completion::Text(s.to_string())
}

pub fn call(id: &str, tool: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        call_id: id.to_string(),
        tool_name: tool.to_string(),
        arguments: args,
    }
}

pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Completion {
    Completion::ToolCalls(calls)
}

/// Settings with short timeouts and millisecond backoff.
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        max_tool_rounds: 5,
        tool_timeout: Duration::from_millis(500),
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            call_timeout: Duration::from_secs(2),
        },
        extraction_window: 4,
    }
}

pub fn test_memory_config() -> MemoryConfig {
    MemoryConfig {
        min_score: 0.1,
        ..MemoryConfig::default()
    }
}

/// Orchestrator over an in-memory database with the built-in tools plus
/// whatever `extra` registers. The extraction queue's receiving end is kept
/// so tests can inspect enqueued jobs.
pub struct Harness {
    pub db: Db,
    pub conversations: ConversationStore,
    pub knowledge: KnowledgeStore,
    pub orchestrator: Orchestrator,
    pub jobs: mpsc::Receiver<ExtractionJob>,
}

pub fn harness(
    model: Arc<dyn ModelClient>,
    settings: OrchestratorSettings,
    extra: impl FnOnce(&mut RegistryBuilder),
) -> Harness {
    let embedder = Arc::new(apex::embedding::hashing::HashingEmbedder::new(512).unwrap());
    harness_with_embedder(embedder, model, settings, extra)
}

pub fn harness_with_embedder(
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn ModelClient>,
    settings: OrchestratorSettings,
    extra: impl FnOnce(&mut RegistryBuilder),
) -> Harness {
    let db = shared_db();
    let conversations = ConversationStore::new(Arc::clone(&db));
    let knowledge = KnowledgeStore::new(Arc::clone(&db), embedder);
    let memory_config = test_memory_config();

    let mut builder = tools::builtin_registry(knowledge.clone(), &memory_config).unwrap();
    extra(&mut builder);
    let registry = Arc::new(builder.build());

    let (queue, jobs) = ExtractionQueue::channel(16);
    let context = ContextBuilder::new(conversations.clone(), knowledge.clone(), &memory_config);
    let orchestrator = Orchestrator::new(
        model,
        registry,
        context,
        conversations.clone(),
        Some(queue),
        settings,
    );

    Harness {
        db,
        conversations,
        knowledge,
        orchestrator,
        jobs,
    }
}

//! Error taxonomy for the assistant core.
//!
//! Tool errors are local to one tool call and are always converted into an
//! error result fed back to the model. Model errors are retried and then
//! surfaced as [`OrchestratorError::ModelCallFailure`]. Extraction errors never
//! leave the background worker.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single tool invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool {tool} failed: {reason}")]
    ExecutionFailed { tool: String, reason: String },

    #[error("tool {tool} timed out after {}ms", .timeout.as_millis())]
    Timeout { tool: String, timeout: Duration },
}

/// Raised while populating the tool registry at start-up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("tool {tool} declares parameter {param} twice")]
    DuplicateParameter { tool: String, param: String },
}

/// Failure talking to the model-completion backend.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("rate limited by provider")]
    RateLimited,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("model call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Whether a retry with backoff has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Authentication(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// Failure producing an embedding vector.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider returned no vector")]
    Empty,
}

/// Failure in the conversation or knowledge store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("fact not found: {0}")]
    FactNotFound(String),

    #[error("content must not be empty")]
    EmptyContent,

    #[error("db lock poisoned")]
    LockPoisoned,

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Hard failure of one orchestrated request.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("model call failed after {attempts} attempt(s): {source}")]
    ModelCallFailure {
        attempts: u32,
        #[source]
        source: ModelError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Background fact-extraction failure. Logged, never surfaced to the user.
/// Store failures are logged per fact and never abort a job.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extraction model call failed: {0}")]
    Model(#[from] ModelError),
}

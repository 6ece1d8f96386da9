//! Process wiring: database, providers, stores, tool registry, extraction
//! worker and orchestrator.
//!
//! [`Runtime::start`] builds everything from configuration;
//! [`Runtime::assemble`] takes already-built providers so tests and embedders
//! of the library can swap in their own. [`Runtime::shutdown`] closes the
//! extraction queue and waits for the worker to drain it.

use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::task::JoinHandle;

use crate::config::ApexConfig;
use crate::context::ContextBuilder;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::extractor::{self, ExtractionQueue, FactExtractor};
use crate::memory::conversation::ConversationStore;
use crate::memory::knowledge::KnowledgeStore;
use crate::memory::{self, Db};
use crate::model::openai::OpenAiChatClient;
use crate::model::ModelClient;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::tools::{self, ToolRegistry};

pub struct Runtime {
    pub config: Arc<ApexConfig>,
    pub db: Db,
    pub conversations: ConversationStore,
    pub knowledge: KnowledgeStore,
    pub registry: Arc<ToolRegistry>,
    pub orchestrator: Orchestrator,
    worker: JoinHandle<()>,
}

impl Runtime {
    /// Open the configured database and build every component. Must be called
    /// from within a tokio runtime.
    pub fn start(config: ApexConfig) -> Result<Self> {
        let db_path = config.resolved_db_path();
        let conn = db::open_database(&db_path)?;

        if config.model.api_key.is_empty() {
            tracing::warn!("no model API key configured; set OPENAI_API_KEY or model.api_key");
        }

        let embedder = embedding::create_provider(&config.embedding)
            .context("failed to create embedding provider")?;
        tracing::info!(model = embedder.model_id(), dims = embedder.dimensions(), "embedding provider ready");

        let chat: Arc<dyn ModelClient> =
            Arc::new(OpenAiChatClient::new(&config.model, &config.model.model)?);
        let extraction: Arc<dyn ModelClient> =
            Arc::new(OpenAiChatClient::new(&config.model, &config.model.extraction_model)?);

        Self::assemble(config, conn, embedder, chat, extraction)
    }

    /// Build the runtime around an opened connection and ready providers.
    pub fn assemble(
        config: ApexConfig,
        conn: Connection,
        embedder: Arc<dyn EmbeddingProvider>,
        chat_model: Arc<dyn ModelClient>,
        extraction_model: Arc<dyn ModelClient>,
    ) -> Result<Self> {
        check_embedding_model(&conn, embedder.model_id())?;

        let db = memory::shared(conn);
        let conversations = ConversationStore::new(Arc::clone(&db));
        let knowledge = KnowledgeStore::new(Arc::clone(&db), embedder)
            .with_dedup_threshold(config.memory.dedup_threshold);

        let registry = Arc::new(
            tools::builtin_registry(knowledge.clone(), &config.memory)
                .context("failed to register built-in tools")?
                .build(),
        );

        let (queue, rx) = ExtractionQueue::channel(config.memory.extraction_queue_capacity);
        let fact_extractor = FactExtractor::new(extraction_model, config.model.timeout());
        let worker = extractor::spawn_worker(rx, fact_extractor, knowledge.clone());

        let context = ContextBuilder::new(conversations.clone(), knowledge.clone(), &config.memory);
        let orchestrator = Orchestrator::new(
            chat_model,
            Arc::clone(&registry),
            context,
            conversations.clone(),
            Some(queue),
            OrchestratorSettings::from_config(&config),
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            conversations,
            knowledge,
            registry,
            orchestrator,
            worker,
        })
    }

    /// Stop accepting extraction jobs and wait for queued ones to finish.
    pub async fn shutdown(self) -> Result<()> {
        let Runtime {
            orchestrator, worker, ..
        } = self;
        // the orchestrator owns the only queue handle
        drop(orchestrator);
        worker.await.context("extraction worker panicked")?;
        tracing::info!("runtime shut down");
        Ok(())
    }
}

/// Record the active embedding model on first use; warn when stored facts
/// were embedded by a different one.
fn check_embedding_model(conn: &Connection, active: &str) -> Result<()> {
    match db::migrations::get_embedding_model(conn)? {
        None => {
            db::migrations::set_embedding_model(conn, active)?;
        }
        Some(stored) if stored != active => {
            let stale = memory::knowledge::count_stale(conn, active)?;
            tracing::warn!(
                stored = %stored,
                configured = %active,
                stale_facts = stale,
                "embedding model changed; stale facts are skipped until `apex re-embed` runs"
            );
        }
        Some(_) => {}
    }
    Ok(())
}

//! Explicit memory tools backed by the knowledge store.

use async_trait::async_trait;
use serde::Deserialize;

use super::registry::{ParamSpec, ParamType, RegistryBuilder, ToolHandler, ToolSpec};
use crate::config::MemoryConfig;
use crate::error::{RegistryError, StoreError};
use crate::memory::knowledge::KnowledgeStore;
use crate::model::ToolArgs;

/// Reply when recall finds nothing above the threshold.
pub const NOTHING_STORED: &str = "I don't have anything stored about that.";

/// Register `remember`, `recall` and `forget_fact`.
pub fn register(
    builder: &mut RegistryBuilder,
    store: KnowledgeStore,
    memory: &MemoryConfig,
) -> Result<(), RegistryError> {
    builder.register(
        ToolSpec::new(
            "remember",
            "Store information the user explicitly asks to remember \
             ('remember X', 'save this', 'note that').",
            RememberTool { store: store.clone() },
        )
        .param(ParamSpec::required(
            "content",
            ParamType::String,
            "The information to store, as a short self-contained statement",
        )),
    )?;

    builder.register(
        ToolSpec::new(
            "recall",
            "Search long-term memory ('do you remember X', 'what do you know about X').",
            RecallTool {
                store: store.clone(),
                top_k: memory.max_facts,
                min_score: memory.min_score,
            },
        )
        .param(ParamSpec::required("query", ParamType::String, "What to search for in memory")),
    )?;

    builder.register(
        ToolSpec::new(
            "forget_fact",
            "Remove a stored fact by id. Use recall first to find the id.",
            ForgetFactTool { store },
        )
        .param(ParamSpec::required("fact_id", ParamType::String, "Id of the fact to forget")),
    )?;

    Ok(())
}

fn parse<T: for<'de> Deserialize<'de>>(args: ToolArgs) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::Object(args)).map_err(|e| e.to_string())
}

#[derive(Deserialize)]
struct RememberParams {
    content: String,
}

struct RememberTool {
    store: KnowledgeStore,
}

#[async_trait]
impl ToolHandler for RememberTool {
    async fn call(&self, args: ToolArgs) -> Result<String, String> {
        let params: RememberParams = parse(args)?;
        let fact = self
            .store
            .add_fact(&params.content)
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("Got it. I'll remember that. (fact {})", fact.id))
    }
}

#[derive(Deserialize)]
struct RecallParams {
    query: String,
}

struct RecallTool {
    store: KnowledgeStore,
    top_k: usize,
    min_score: f32,
}

#[async_trait]
impl ToolHandler for RecallTool {
    async fn call(&self, args: ToolArgs) -> Result<String, String> {
        let params: RecallParams = parse(args)?;
        let hits = self
            .store
            .search(&params.query, self.top_k, self.min_score)
            .await
            .map_err(|e| e.to_string())?;

        if hits.is_empty() {
            return Ok(NOTHING_STORED.to_string());
        }

        let lines: Vec<String> = hits
            .iter()
            .map(|h| format!("- [{}] {} ({:.2})", h.fact.id, h.fact.content, h.score))
            .collect();
        Ok(lines.join("\n"))
    }
}

#[derive(Deserialize)]
struct ForgetParams {
    fact_id: String,
}

struct ForgetFactTool {
    store: KnowledgeStore,
}

#[async_trait]
impl ToolHandler for ForgetFactTool {
    async fn call(&self, args: ToolArgs) -> Result<String, String> {
        let params: ForgetParams = parse(args)?;
        match self.store.forget(&params.fact_id).await {
            Ok(()) => Ok(format!("Done. Forgot fact {}.", params.fact_id)),
            Err(StoreError::FactNotFound(id)) => Err(format!("no fact with id {id}")),
            Err(e) => Err(e.to_string()),
        }
    }
}

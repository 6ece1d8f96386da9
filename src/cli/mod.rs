pub mod chat;
pub mod doctor;
pub mod forget;
pub mod history;
pub mod re_embed;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use apex::config::ApexConfig;
use apex::memory::knowledge::KnowledgeStore;

/// Open the configured database and pair it with the configured embedder.
/// Used by commands that touch facts but never call the chat model.
pub(crate) fn open_knowledge(config: &ApexConfig) -> Result<KnowledgeStore> {
    let conn = apex::db::open_database(config.resolved_db_path())?;
    let embedder = apex::embedding::create_provider(&config.embedding)
        .context("failed to create embedding provider")?;
    Ok(KnowledgeStore::new(apex::memory::shared(conn), embedder)
        .with_dedup_threshold(config.memory.dedup_threshold))
}

/// Shorten `text` to at most `max` characters, marking the cut.
pub(crate) fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

use anyhow::Result;
use apex::config::ApexConfig;

use super::{open_knowledge, preview};

/// Run a fact search from the terminal.
pub async fn search(config: &ApexConfig, query: &str, limit: usize) -> Result<()> {
    let store = open_knowledge(config)?;

    let results = store.search(query, limit, config.memory.min_score).await?;

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", results.len());

    for (i, hit) in results.iter().enumerate() {
        println!(
            "  {}. [{}] {} (score: {:.4})",
            i + 1,
            hit.fact.id,
            preview(&hit.fact.content, 120),
            hit.score
        );
        println!("     created {}", hit.fact.created_at.format("%Y-%m-%d %H:%M"));
    }

    Ok(())
}

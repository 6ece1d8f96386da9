use anyhow::{Context, Result};
use apex::config::ApexConfig;

/// Display store statistics in the terminal.
pub fn stats(config: &ApexConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = apex::db::open_database(&db_path)?;
    let active_model = apex::embedding::create_provider(&config.embedding)
        .context("failed to create embedding provider")?
        .model_id()
        .to_string();

    let response = apex::memory::stats::memory_stats(&conn, &active_model, Some(db_path.as_path()))?;

    println!("Apex Statistics");
    println!("{}", "=".repeat(40));
    println!("  Conversations:       {}", response.conversations);
    println!("  Turns:               {}", response.total_turns);
    println!();
    println!("  Facts:               {}", response.total_facts);
    println!("  Searchable:          {}", response.current_facts);
    println!("  Stale:               {}", response.stale_facts);
    println!();

    println!("Facts by embedding model:");
    for (model, count) in &response.facts_by_model {
        let marker = if *model == active_model { " (active)" } else { "" };
        println!("  {:<28} {}{}", model, count, marker);
    }
    println!();

    println!("Database size:         {} bytes", response.db_size_bytes);
    if let Some(ref oldest) = response.oldest_fact {
        println!("Oldest fact:           {oldest}");
    }
    if let Some(ref newest) = response.newest_fact {
        println!("Newest fact:           {newest}");
    }
    if response.stale_facts > 0 {
        println!();
        println!("Run `apex re-embed` to make stale facts searchable again.");
    }

    Ok(())
}

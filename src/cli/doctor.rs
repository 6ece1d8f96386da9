//! CLI `doctor` command: database diagnostics and a health report.

use anyhow::{Context, Result};
use apex::config::ApexConfig;
use apex::db;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &ApexConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `apex chat` or `apex ask` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    let active_model = apex::embedding::create_provider(&config.embedding)
        .map(|p| p.model_id().to_string())
        .unwrap_or_else(|e| format!("(unavailable: {e})"));

    println!("Apex Health Report");
    println!("==================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Embedding model:");
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {active_model}");
    if let Some(ref stored) = report.embedding_model {
        if stored != &active_model {
            println!("  WARNING: model mismatch! Run `apex re-embed` to update vectors.");
        } else {
            println!("  Status:          OK (match)");
        }
    }
    println!();
    println!("Row counts:");
    println!("  Turns:           {}", report.turn_count);
    println!("  Facts:           {}", report.fact_count);
    println!("  Fact log:        {}", report.log_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery: restore the database from a backup, e.g.");
        println!("  cp backup.db {}", db_path.display());
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

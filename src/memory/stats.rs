use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Snapshot of what the stores hold.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_turns: u64,
    pub conversations: u64,
    pub total_facts: u64,
    /// Facts searchable with the active embedding model.
    pub current_facts: u64,
    /// Facts from other models, waiting for `apex re-embed`.
    pub stale_facts: u64,
    pub facts_by_model: BTreeMap<String, u64>,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_fact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_fact: Option<String>,
}

/// Compute store statistics.
///
/// `active_model` splits facts into current and stale. `db_path` is used for
/// file size calculation; pass None for in-memory databases.
pub fn memory_stats(
    conn: &Connection,
    active_model: &str,
    db_path: Option<&Path>,
) -> Result<StatsResponse> {
    let (total_turns, conversations) = count_turns(conn)?;
    let facts_by_model = count_by_model(conn)?;
    let total_facts: u64 = facts_by_model.values().sum();
    let current_facts = facts_by_model.get(active_model).copied().unwrap_or(0);
    let (oldest, newest) = fact_time_range(conn)?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_turns,
        conversations,
        total_facts,
        current_facts,
        stale_facts: total_facts - current_facts,
        facts_by_model,
        db_size_bytes,
        oldest_fact: oldest,
        newest_fact: newest,
    })
}

/// Turn count and distinct conversation count.
fn count_turns(conn: &Connection) -> Result<(u64, u64)> {
    let (turns, convs): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT conversation_id) FROM turns",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok((turns as u64, convs as u64))
}

fn count_by_model(conn: &Connection) -> Result<BTreeMap<String, u64>> {
    let mut stmt =
        conn.prepare("SELECT embedding_model, COUNT(*) FROM facts GROUP BY embedding_model")?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(params![], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(|(m, c)| (m, c as u64)).collect())
}

/// Oldest and newest fact timestamps.
fn fact_time_range(conn: &Connection) -> Result<(Option<String>, Option<String>)> {
    let range = conn.query_row(
        "SELECT MIN(created_at), MAX(created_at) FROM facts",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(range)
}

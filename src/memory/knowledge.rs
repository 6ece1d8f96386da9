//! Semantic fact store.
//!
//! Write path: embed → dimension check → dedup gate → insert fact and audit
//! row, gate and insert sharing one transaction. Read path: embed the query,
//! load every fact tagged with the active embedding model, rank by cosine
//! similarity in memory. When the embedder is down, [`KnowledgeStore::search_keyword`]
//! is the substring fallback.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use super::similarity::{cosine_similarity, rank};
use super::types::{Fact, ScoredFact};
use super::{
    bytes_to_embedding, embedding_to_bytes, format_timestamp, like_pattern, parse_timestamp, with_conn, Db,
};
use crate::embedding::{check_dimensions, EmbeddingProvider};
use crate::error::{EmbeddingError, StoreError};

/// Cosine similarity at or above which a new fact counts as one already stored.
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.92;

/// Stored facts re-embedded per provider request.
const RE_EMBED_BATCH: usize = 32;

const FACT_COLUMNS: &str = "id, content, embedding, embedding_model, created_at, source_turn_id";

fn row_to_fact(row: &Row<'_>) -> rusqlite::Result<Fact> {
    let blob: Vec<u8> = row.get(2)?;
    let created_at: String = row.get(4)?;
    Ok(Fact {
        id: row.get(0)?,
        content: row.get(1)?,
        embedding: bytes_to_embedding(&blob),
        embedding_model: row.get(3)?,
        created_at: parse_timestamp(&created_at),
        source_turn_id: row.get(5)?,
    })
}

/// Result of [`store_fact`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    Inserted,
    /// Nothing written except an audit row against `existing`.
    Duplicate { existing: Fact, score: f32 },
}

/// Lowercased with runs of whitespace collapsed.
fn normalize(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Closest same-model fact that counts as a duplicate of `fact`: identical
/// normalized text, or cosine similarity of at least `threshold`.
fn find_duplicate(
    conn: &Connection,
    fact: &Fact,
    threshold: f32,
) -> rusqlite::Result<Option<(Fact, f32)>> {
    let wanted = normalize(&fact.content);
    let best = facts_for_model(conn, &fact.embedding_model)?
        .into_iter()
        .filter_map(|existing| {
            let exact = normalize(&existing.content) == wanted;
            let score = if exact {
                1.0
            } else {
                cosine_similarity(&fact.embedding, &existing.embedding)
            };
            (exact || score >= threshold).then_some((existing, score))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1));
    Ok(best)
}

/// Insert `fact` unless a duplicate already exists. The dedup check and the
/// write share one transaction.
pub fn store_fact(conn: &mut Connection, fact: &Fact, dedup_threshold: f32) -> rusqlite::Result<StoreOutcome> {
    let tx = conn.transaction()?;

    if let Some((existing, score)) = find_duplicate(&tx, fact, dedup_threshold)? {
        write_fact_log(
            &tx,
            "dedup",
            &existing.id,
            Some(&serde_json::json!({
                "content": fact.content,
                "score": score,
                "source_turn_id": fact.source_turn_id,
            })),
        )?;
        tx.commit()?;
        return Ok(StoreOutcome::Duplicate { existing, score });
    }

    insert_row(&tx, fact)?;
    tx.commit()?;
    Ok(StoreOutcome::Inserted)
}

/// Insert a fact and its audit entry atomically, without the dedup gate.
pub fn insert_fact(conn: &mut Connection, fact: &Fact) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    insert_row(&tx, fact)?;
    tx.commit()
}

fn insert_row(tx: &Transaction, fact: &Fact) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO facts (id, content, embedding, dimensions, embedding_model, created_at, source_turn_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            fact.id,
            fact.content,
            embedding_to_bytes(&fact.embedding),
            fact.embedding.len() as i64,
            fact.embedding_model,
            format_timestamp(&fact.created_at),
            fact.source_turn_id,
        ],
    )?;
    let details = fact.source_turn_id.map(|t| serde_json::json!({ "source_turn_id": t }));
    write_fact_log(tx, "create", &fact.id, details.as_ref())
}

pub fn get_fact(conn: &Connection, id: &str) -> rusqlite::Result<Option<Fact>> {
    conn.query_row(
        &format!("SELECT {FACT_COLUMNS} FROM facts WHERE id = ?1"),
        params![id],
        row_to_fact,
    )
    .optional()
}

/// Every fact whose vector came from `model`.
pub fn facts_for_model(conn: &Connection, model: &str) -> rusqlite::Result<Vec<Fact>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FACT_COLUMNS} FROM facts WHERE embedding_model = ?1"
    ))?;
    let facts = stmt
        .query_map(params![model], row_to_fact)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(facts)
}

/// Facts embedded by any model other than `model`.
pub fn stale_facts(conn: &Connection, model: &str) -> rusqlite::Result<Vec<Fact>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FACT_COLUMNS} FROM facts WHERE embedding_model != ?1 ORDER BY created_at ASC"
    ))?;
    let facts = stmt
        .query_map(params![model], row_to_fact)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(facts)
}

pub fn count_stale(conn: &Connection, model: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM facts WHERE embedding_model != ?1",
        params![model],
        |row| row.get(0),
    )
}

/// Newest first.
pub fn list_facts(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<Fact>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FACT_COLUMNS} FROM facts ORDER BY created_at DESC, id DESC LIMIT ?1"
    ))?;
    let facts = stmt
        .query_map(params![limit as i64], row_to_fact)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(facts)
}

/// Case-insensitive substring match on fact content across every embedding
/// model, newest first.
pub fn search_keyword(conn: &Connection, query: &str, limit: usize) -> rusqlite::Result<Vec<Fact>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FACT_COLUMNS} FROM facts WHERE content LIKE ?1 ESCAPE '\\' \
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    ))?;
    let facts = stmt
        .query_map(params![like_pattern(query), limit as i64], row_to_fact)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(facts)
}

pub fn count_facts(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM facts", [], |row| row.get(0))
}

/// Delete a fact. Returns `false` when no row had that id.
pub fn delete_fact(conn: &mut Connection, id: &str) -> rusqlite::Result<bool> {
    let tx = conn.transaction()?;
    let removed = tx.execute("DELETE FROM facts WHERE id = ?1", params![id])?;
    if removed > 0 {
        write_fact_log(&tx, "delete", id, None)?;
    }
    tx.commit()?;
    Ok(removed > 0)
}

/// Replace a fact's vector and model tag. Content is untouched.
pub fn replace_embedding(
    conn: &mut Connection,
    id: &str,
    embedding: &[f32],
    model: &str,
) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    let old_model: Option<String> = tx
        .query_row(
            "SELECT embedding_model FROM facts WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    tx.execute(
        "UPDATE facts SET embedding = ?1, dimensions = ?2, embedding_model = ?3 WHERE id = ?4",
        params![embedding_to_bytes(embedding), embedding.len() as i64, model, id],
    )?;
    write_fact_log(
        &tx,
        "re_embed",
        id,
        Some(&serde_json::json!({ "from": old_model, "to": model })),
    )?;
    tx.commit()
}

fn write_fact_log(
    tx: &Transaction,
    operation: &str,
    fact_id: &str,
    details: Option<&serde_json::Value>,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO fact_log (operation, fact_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            operation,
            fact_id,
            details.map(|d| d.to_string()),
            format_timestamp(&Utc::now()),
        ],
    )?;
    Ok(())
}

/// Async handle combining the shared connection with the embedding provider.
#[derive(Clone)]
pub struct KnowledgeStore {
    db: Db,
    embedder: Arc<dyn EmbeddingProvider>,
    dedup_threshold: f32,
}

impl KnowledgeStore {
    pub fn new(db: Db, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            db,
            embedder,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
        }
    }

    /// Values above 1.0 leave only the exact-text check.
    pub fn with_dedup_threshold(mut self, threshold: f32) -> Self {
        self.dedup_threshold = threshold;
        self
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_id()
    }

    pub async fn add_fact(&self, content: &str) -> Result<Fact, StoreError> {
        self.insert(content, None).await
    }

    pub async fn add_fact_from_turn(&self, content: &str, source_turn_id: i64) -> Result<Fact, StoreError> {
        self.insert(content, Some(source_turn_id)).await
    }

    async fn insert(&self, content: &str, source_turn_id: Option<i64>) -> Result<Fact, StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::EmptyContent);
        }

        let embedding = self.embedder.embed(content).await?;
        check_dimensions(self.embedder.dimensions(), &embedding)?;

        let fact = Fact {
            id: uuid::Uuid::now_v7().to_string(),
            content: content.to_string(),
            embedding,
            embedding_model: self.embedder.model_id().to_string(),
            created_at: super::now(),
            source_turn_id,
        };

        let candidate = fact.clone();
        let threshold = self.dedup_threshold;
        let outcome = with_conn(&self.db, move |conn| Ok(store_fact(conn, &candidate, threshold)?)).await?;

        match outcome {
            StoreOutcome::Inserted => {
                tracing::info!(id = %fact.id, source_turn = ?fact.source_turn_id, "fact stored");
                Ok(fact)
            }
            StoreOutcome::Duplicate { existing, score } => {
                tracing::debug!(id = %existing.id, score, "fact already known, not stored again");
                Ok(existing)
            }
        }
    }

    /// Linear-scan cosine search over facts tagged with the active model.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredFact>, StoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;
        check_dimensions(self.embedder.dimensions(), &query_embedding)?;

        let model = self.embedder.model_id().to_string();
        let results = with_conn(&self.db, move |conn| {
            let stale = count_stale(conn, &model)?;
            if stale > 0 {
                tracing::debug!(stale, model = %model, "skipping facts from other embedding models");
            }
            let candidates = facts_for_model(conn, &model)?;
            Ok(rank(&query_embedding, candidates, top_k, min_score))
        })
        .await?;

        tracing::debug!(hits = results.len(), top_k, min_score, "fact search complete");
        Ok(results)
    }

    /// Substring search that needs no embedding. Hits carry a score of 0.
    pub async fn search_keyword(&self, query: &str, limit: usize) -> Result<Vec<ScoredFact>, StoreError> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = query.trim().to_string();
        let facts = with_conn(&self.db, move |conn| Ok(search_keyword(conn, &query, limit)?)).await?;
        Ok(facts.into_iter().map(|fact| ScoredFact { fact, score: 0.0 }).collect())
    }

    pub async fn forget(&self, fact_id: &str) -> Result<(), StoreError> {
        let id = fact_id.to_string();
        let removed = with_conn(&self.db, move |conn| Ok(delete_fact(conn, &id)?)).await?;
        if !removed {
            return Err(StoreError::FactNotFound(fact_id.to_string()));
        }
        tracing::info!(id = fact_id, "fact forgotten");
        Ok(())
    }

    pub async fn get(&self, fact_id: &str) -> Result<Option<Fact>, StoreError> {
        let id = fact_id.to_string();
        with_conn(&self.db, move |conn| Ok(get_fact(conn, &id)?)).await
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Fact>, StoreError> {
        with_conn(&self.db, move |conn| Ok(list_facts(conn, limit)?)).await
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        with_conn(&self.db, |conn| Ok(count_facts(conn)?)).await
    }

    /// Facts whose vectors came from a different model than the active one.
    pub async fn stale_facts(&self) -> Result<Vec<Fact>, StoreError> {
        let model = self.embedder.model_id().to_string();
        with_conn(&self.db, move |conn| Ok(stale_facts(conn, &model)?)).await
    }

    /// Re-embed every stale fact with the active model and record it as the
    /// database's embedding model. Facts go to the provider in batches;
    /// `progress` is called after each batch with `(done, total)`.
    pub async fn re_embed_stale<F>(&self, mut progress: F) -> Result<usize, StoreError>
    where
        F: FnMut(usize, usize),
    {
        let stale = self.stale_facts().await?;
        let total = stale.len();
        let model = self.embedder.model_id().to_string();
        let mut done = 0;

        for batch in stale.chunks(RE_EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|f| f.content.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::Provider(format!(
                    "requested {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                ))
                .into());
            }
            for embedding in &embeddings {
                check_dimensions(self.embedder.dimensions(), embedding)?;
            }

            let ids: Vec<String> = batch.iter().map(|f| f.id.clone()).collect();
            let model_for_write = model.clone();
            with_conn(&self.db, move |conn| {
                for (id, embedding) in ids.iter().zip(&embeddings) {
                    replace_embedding(conn, id, embedding, &model_for_write)?;
                }
                Ok(())
            })
            .await?;

            done += batch.len();
            progress(done, total);
        }

        with_conn(&self.db, move |conn| {
            Ok(crate::db::migrations::set_embedding_model(conn, &model)?)
        })
        .await?;

        tracing::info!(count = total, "stale facts re-embedded");
        Ok(total)
    }
}

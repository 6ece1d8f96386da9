//! Append-only conversation log.
//!
//! Free functions operate on a borrowed connection; [`ConversationStore`] is
//! the async, shareable handle the orchestrator and CLI use. Nothing here ever
//! deletes a turn.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, Transaction};
use serde::Serialize;

use super::types::{Role, Turn};
use super::{format_timestamp, like_pattern, parse_timestamp, with_conn, Db};
use crate::error::StoreError;

/// One row of [`conversations`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub turn_count: i64,
    pub last_active: DateTime<Utc>,
}

const TURN_COLUMNS: &str = "id, conversation_id, seq, role, content, created_at";

fn row_to_turn(row: &Row<'_>) -> rusqlite::Result<Turn> {
    let role: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    Ok(Turn {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        seq: row.get(2)?,
        role: role.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        content: row.get(4)?,
        timestamp: parse_timestamp(&created_at),
    })
}

fn insert_turn(
    tx: &Transaction,
    conversation_id: &str,
    role: Role,
    content: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<Turn> {
    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM turns WHERE conversation_id = ?1",
        params![conversation_id],
        |row| row.get(0),
    )?;

    tx.execute(
        "INSERT INTO turns (conversation_id, seq, role, content, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![conversation_id, seq, role.as_str(), content, format_timestamp(&now)],
    )?;

    Ok(Turn {
        id: tx.last_insert_rowid(),
        conversation_id: conversation_id.to_string(),
        seq,
        role,
        content: content.to_string(),
        timestamp: now,
    })
}

/// Append a turn, assigning the next `seq` for the conversation inside one
/// transaction.
pub fn append_turn(
    conn: &mut Connection,
    conversation_id: &str,
    role: Role,
    content: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<Turn> {
    let tx = conn.transaction()?;
    let turn = insert_turn(&tx, conversation_id, role, content, now)?;
    tx.commit()?;
    Ok(turn)
}

/// Append a user message (if any) and the assistant's reply together. Either
/// both land or neither does.
pub fn append_exchange(
    conn: &mut Connection,
    conversation_id: &str,
    user_message: Option<&str>,
    reply: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<(Option<Turn>, Turn)> {
    let tx = conn.transaction()?;
    let user_turn = user_message
        .map(|content| insert_turn(&tx, conversation_id, Role::User, content, now))
        .transpose()?;
    let assistant_turn = insert_turn(&tx, conversation_id, Role::Assistant, reply, now)?;
    tx.commit()?;
    Ok((user_turn, assistant_turn))
}

/// Last `n` turns of a conversation, oldest first.
pub fn recent_turns(conn: &Connection, conversation_id: &str, n: usize) -> rusqlite::Result<Vec<Turn>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {TURN_COLUMNS} FROM turns WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2"
    ))?;
    let mut turns = stmt
        .query_map(params![conversation_id, n as i64], row_to_turn)?
        .collect::<Result<Vec<_>, _>>()?;
    turns.reverse();
    Ok(turns)
}

/// Case-insensitive substring search over all conversations, newest first.
pub fn search_turns(conn: &Connection, query: &str, limit: usize) -> rusqlite::Result<Vec<Turn>> {
    let pattern = like_pattern(query);

    let mut stmt = conn.prepare(&format!(
        "SELECT {TURN_COLUMNS} FROM turns WHERE content LIKE ?1 ESCAPE '\\' \
         ORDER BY id DESC LIMIT ?2"
    ))?;
    let turns = stmt
        .query_map(params![pattern, limit as i64], row_to_turn)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(turns)
}

/// Turns of one conversation written at or after `since`, in order.
pub fn turns_since(
    conn: &Connection,
    conversation_id: &str,
    since: DateTime<Utc>,
) -> rusqlite::Result<Vec<Turn>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TURN_COLUMNS} FROM turns WHERE conversation_id = ?1 AND created_at >= ?2 \
         ORDER BY seq ASC"
    ))?;
    let turns = stmt
        .query_map(params![conversation_id, format_timestamp(&since)], row_to_turn)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(turns)
}

/// Every conversation with its turn count, most recently active first.
pub fn conversations(conn: &Connection) -> rusqlite::Result<Vec<ConversationSummary>> {
    let mut stmt = conn.prepare(
        "SELECT conversation_id, COUNT(*), MAX(created_at) FROM turns \
         GROUP BY conversation_id ORDER BY MAX(created_at) DESC, conversation_id ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let last: String = row.get(2)?;
            Ok(ConversationSummary {
                conversation_id: row.get(0)?,
                turn_count: row.get(1)?,
                last_active: parse_timestamp(&last),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Async handle over the shared connection.
#[derive(Clone)]
pub struct ConversationStore {
    db: Db,
}

impl ConversationStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Durably append a turn and return it. Whitespace-only content is rejected.
    pub async fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Turn, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        let conversation_id = conversation_id.to_string();
        let content = content.to_string();
        let turn = with_conn(&self.db, move |conn| {
            Ok(append_turn(conn, &conversation_id, role, &content, super::now())?)
        })
        .await?;

        tracing::debug!(
            conversation = %turn.conversation_id,
            seq = turn.seq,
            role = %turn.role,
            "turn appended"
        );
        Ok(turn)
    }

    /// Record one finished exchange. A blank `user_message` is skipped; a
    /// blank reply is rejected.
    pub async fn append_exchange(
        &self,
        conversation_id: &str,
        user_message: &str,
        reply: &str,
    ) -> Result<(Option<Turn>, Turn), StoreError> {
        if reply.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        let conversation_id = conversation_id.to_string();
        let user_message = (!user_message.trim().is_empty()).then(|| user_message.to_string());
        let reply = reply.to_string();
        let (user_turn, assistant_turn) = with_conn(&self.db, move |conn| {
            Ok(append_exchange(
                conn,
                &conversation_id,
                user_message.as_deref(),
                &reply,
                super::now(),
            )?)
        })
        .await?;

        tracing::debug!(
            conversation = %assistant_turn.conversation_id,
            seq = assistant_turn.seq,
            "exchange appended"
        );
        Ok((user_turn, assistant_turn))
    }

    pub async fn recent_turns(&self, conversation_id: &str, n: usize) -> Result<Vec<Turn>, StoreError> {
        let conversation_id = conversation_id.to_string();
        with_conn(&self.db, move |conn| Ok(recent_turns(conn, &conversation_id, n)?)).await
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Turn>, StoreError> {
        let query = query.to_string();
        with_conn(&self.db, move |conn| Ok(search_turns(conn, &query, limit)?)).await
    }

    pub async fn turns_since(
        &self,
        conversation_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Turn>, StoreError> {
        let conversation_id = conversation_id.to_string();
        with_conn(&self.db, move |conn| Ok(turns_since(conn, &conversation_id, since)?)).await
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        with_conn(&self.db, |conn| Ok(conversations(conn)?)).await
    }
}

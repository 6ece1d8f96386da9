//! Memory subsystem: the append-only conversation log, the semantic fact
//! store with linear-scan cosine search, and store statistics.
//!
//! Both stores follow the same shape: plain synchronous functions over a
//! `rusqlite::Connection`, wrapped by an async handle that shares one
//! connection behind a mutex and runs every call on the blocking pool.

pub mod conversation;
pub mod knowledge;
pub mod similarity;
pub mod stats;
pub mod types;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::StoreError;

/// Shared handle to the single SQLite connection.
pub type Db = Arc<Mutex<Connection>>;

/// Wrap an opened connection for sharing between stores.
pub fn shared(conn: Connection) -> Db {
    Arc::new(Mutex::new(conn))
}

/// Run `f` against the locked connection on tokio's blocking pool.
pub(crate) async fn with_conn<T, F>(db: &Db, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    })
    .await?
}

/// Serialize an embedding as little-endian f32 bytes for the `facts.embedding` BLOB.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Inverse of [`embedding_to_bytes`]. Trailing bytes that do not form a full
/// f32 are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Current time at the precision timestamps are stored with.
pub(crate) fn now() -> chrono::DateTime<chrono::Utc> {
    use chrono::SubsecRound;
    chrono::Utc::now().trunc_subsecs(6)
}

/// Fixed width, so text comparison matches time order.
pub(crate) fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// `%query%` with LIKE wildcards escaped; pair with `ESCAPE '\'`.
pub(crate) fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub(crate) fn parse_timestamp(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            tracing::warn!(value = raw, error = %e, "unparseable timestamp in database");
            chrono::DateTime::<chrono::Utc>::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_are_little_endian() {
        let bytes = embedding_to_bytes(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(bytes_to_embedding(&bytes), vec![1.0, -2.5]);
    }

    #[test]
    fn partial_trailing_bytes_ignored() {
        let mut bytes = embedding_to_bytes(&[0.5]);
        bytes.push(0xFF);
        assert_eq!(bytes_to_embedding(&bytes), vec![0.5]);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("100%_a\\b"), "%100\\%\\_a\\\\b%");
    }

    #[test]
    fn timestamps_sort_lexically() {
        let a = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:09Z").unwrap().with_timezone(&chrono::Utc);
        let b = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:10.5Z").unwrap().with_timezone(&chrono::Utc);
        assert!(format_timestamp(&a) < format_timestamp(&b));
        assert_eq!(parse_timestamp(&format_timestamp(&b)), b);
    }
}

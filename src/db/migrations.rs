//! Forward-only migrations keyed on `schema_meta.schema_version`.
//!
//! `schema_meta` also carries `embedding_model`, the provider the stored
//! vectors were last aligned with. See [`crate::runtime`] for how a mismatch
//! is reported.

use rusqlite::{Connection, OptionalExtension};

/// Version this binary writes and expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

type Migration = fn(&Connection) -> rusqlite::Result<()>;

/// `(target version, step)`, in order.
const MIGRATIONS: &[(u32, Migration)] = &[(2, record_embedding_model), (3, allow_dedup_log)];

fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM schema_meta WHERE key = ?1", [key], |row| row.get(0))
        .optional()
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schema_meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

/// Unparseable or missing versions read as 0, which re-runs every step.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    Ok(get_meta(conn, "schema_version")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    get_meta(conn, "embedding_model")
}

pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    set_meta(conn, "embedding_model", model)
}

/// Apply every step above the stored version, each in its own transaction
/// together with the version bump.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let current = get_schema_version(conn)?;
    tracing::debug!(schema_version = current, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    for &(target, step) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        tracing::info!(to = target, "running migration");
        let tx = conn.unchecked_transaction()?;
        step(&tx)?;
        set_meta(&tx, "schema_version", &target.to_string())?;
        tx.commit()?;
    }

    Ok(())
}

/// v2: take the embedding model from the newest fact. Databases without facts
/// get it at first start-up instead.
fn record_embedding_model(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) \
         SELECT 'embedding_model', embedding_model FROM facts \
         ORDER BY created_at DESC LIMIT 1",
        [],
    )?;
    Ok(())
}

/// v3: `fact_log.operation` also accepts `dedup`. SQLite cannot alter a CHECK
/// constraint, so the table is rebuilt.
fn allow_dedup_log(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE fact_log_v3 (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             operation TEXT NOT NULL CHECK(operation IN ('create','delete','re_embed','dedup')),
             fact_id TEXT NOT NULL,
             details TEXT,
             created_at TEXT NOT NULL
         );
         INSERT INTO fact_log_v3 (id, operation, fact_id, details, created_at)
             SELECT id, operation, fact_id, details, created_at FROM fact_log;
         DROP TABLE fact_log;
         ALTER TABLE fact_log_v3 RENAME TO fact_log;
         CREATE INDEX IF NOT EXISTS idx_fact_log_fact ON fact_log(fact_id);",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn fresh_schema_starts_at_v1() {
        assert_eq!(get_schema_version(&v1_db()).unwrap(), 1);
    }

    #[test]
    fn v2_backfills_model_from_newest_fact() {
        let conn = v1_db();
        conn.execute_batch(
            "INSERT INTO facts (id, content, embedding, dimensions, embedding_model, created_at) VALUES \
             ('f1', 'likes tea', x'0000803F', 1, 'hashing-8', '2026-01-01T00:00:00Z'), \
             ('f2', 'likes jazz', x'0000803F', 1, 'hashing-16', '2026-02-01T00:00:00Z');",
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(get_embedding_model(&conn).unwrap().as_deref(), Some("hashing-16"));
    }

    #[test]
    fn v3_keeps_log_rows_and_accepts_dedup() {
        let conn = v1_db();
        conn.execute_batch(
            "DROP TABLE fact_log;
             CREATE TABLE fact_log (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 operation TEXT NOT NULL CHECK(operation IN ('create','delete','re_embed')),
                 fact_id TEXT NOT NULL,
                 details TEXT,
                 created_at TEXT NOT NULL
             );
             INSERT INTO fact_log (operation, fact_id, created_at) VALUES ('create', 'f1', '2026-01-01T00:00:00Z');",
        )
        .unwrap();
        let dedup = "INSERT INTO fact_log (operation, fact_id, created_at) VALUES ('dedup', 'f1', '2026-01-02T00:00:00Z')";
        assert!(conn.execute(dedup, []).is_err());

        run_migrations(&conn).unwrap();

        conn.execute(dedup, []).unwrap();
        let ops: Vec<String> = conn
            .prepare("SELECT operation FROM fact_log ORDER BY id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(ops, vec!["create", "dedup"]);
    }

    #[test]
    fn set_embedding_model_overwrites() {
        let conn = v1_db();
        set_embedding_model(&conn, "hashing-8").unwrap();
        set_embedding_model(&conn, "text-embedding-3-large").unwrap();
        assert_eq!(
            get_embedding_model(&conn).unwrap().as_deref(),
            Some("text-embedding-3-large")
        );
    }

    #[test]
    fn garbage_version_reads_as_zero() {
        let conn = v1_db();
        conn.execute("UPDATE schema_meta SET value = 'x' WHERE key = 'schema_version'", [])
            .unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
    }
}

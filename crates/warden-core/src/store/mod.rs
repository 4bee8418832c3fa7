//! The State Store (component A): a durable, transactional, single-writer-safe
//! SQLite-backed persistence layer shared by every agent process.
//!
//! Fixed table-access order (meta → functions → claims →
//! subdirectory_locks → scratches → match_history → branch_progress →
//! agents → audit_log) rules out deadlocks across concurrent writers.
//! Every state-changing method opens its own `BEGIN IMMEDIATE`
//! transaction, so two agent processes sharing one database file serialize
//! on write and never observe a torn intermediate state.

pub mod agents;
pub mod branch_progress;
pub mod claims;
pub mod functions;
pub mod locks;
pub mod scratches;

use std::path::Path;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// The schema version this build of the store expects. Bump when adding a
/// migration in [`Store::open`].
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// A handle to one agent process's connection to the shared state database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if absent) the database at `path`, verifying and
    /// applying schema migrations as needed.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::configure_connection(&conn)?;
        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database. Used by tests and by the daemon's
    /// ephemeral dry-run mode.
    ///
    /// # Errors
    /// Returns an error if the connection cannot be opened or migrated.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn)?;
        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        // WAL keeps readers from blocking on an in-progress writer; busy_timeout
        // gives a concurrent writer time to finish its BEGIN IMMEDIATE rather
        // than failing immediately with SQLITE_BUSY.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        let version: Option<i64> = tx
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .ok()
            .and_then(|v| v.parse().ok());

        if version.is_none() {
            tx.execute_batch(SCHEMA_V1)?;
            tx.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                [CURRENT_SCHEMA_VERSION.to_string()],
            )?;
        } else if version != Some(CURRENT_SCHEMA_VERSION) {
            return Err(StoreError::Migration(format!(
                "unsupported schema version {version:?}, expected {CURRENT_SCHEMA_VERSION}"
            )));
        }

        tx.commit()?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

const SCHEMA_V1: &str = "
CREATE TABLE functions (
    name                    TEXT PRIMARY KEY,
    source_file             TEXT,
    worktree_path           TEXT,
    match_percent           REAL NOT NULL DEFAULT 0,
    status                  TEXT NOT NULL DEFAULT 'unclaimed',
    local_scratch_slug      TEXT,
    production_scratch_slug TEXT,
    claimed_by_agent        TEXT,
    claimed_at              TEXT,
    branch                  TEXT,
    commit_hash             TEXT,
    build_status            TEXT NOT NULL DEFAULT 'unknown',
    build_diagnosis         TEXT,
    is_committed            INTEGER NOT NULL DEFAULT 0,
    pr_url                  TEXT,
    pr_number               INTEGER,
    pr_state                TEXT,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
);
CREATE INDEX idx_functions_status ON functions(status);
CREATE INDEX idx_functions_updated_at ON functions(updated_at);

CREATE TABLE claims (
    function_name TEXT NOT NULL,
    agent_id      TEXT NOT NULL,
    claimed_at    TEXT NOT NULL,
    expires_at    TEXT NOT NULL,
    PRIMARY KEY (function_name)
);
CREATE INDEX idx_claims_expires_at ON claims(expires_at);

CREATE TABLE subdirectory_locks (
    key                   TEXT PRIMARY KEY,
    worktree_path         TEXT NOT NULL,
    branch                TEXT,
    locked_by_agent       TEXT NOT NULL,
    locked_at             TEXT NOT NULL,
    lock_expires_at       TEXT NOT NULL,
    pending_commits_count INTEGER NOT NULL DEFAULT 0,
    last_commit_at        TEXT
);
CREATE INDEX idx_locks_expires_at ON subdirectory_locks(lock_expires_at);

CREATE TABLE scratches (
    slug             TEXT PRIMARY KEY,
    instance         TEXT NOT NULL,
    base_url         TEXT NOT NULL,
    function_name    TEXT NOT NULL,
    score            INTEGER NOT NULL,
    max_score        INTEGER NOT NULL,
    match_percent    REAL NOT NULL,
    claim_token      TEXT,
    verified_at      TEXT,
    created_at       TEXT NOT NULL
);
CREATE INDEX idx_scratches_function_name ON scratches(function_name);
CREATE INDEX idx_scratches_verified_at ON scratches(verified_at);

CREATE TABLE match_history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    scratch_slug  TEXT NOT NULL,
    timestamp     TEXT NOT NULL,
    score         INTEGER NOT NULL,
    max_score     INTEGER NOT NULL,
    match_percent REAL NOT NULL
);
CREATE INDEX idx_match_history_slug ON match_history(scratch_slug, timestamp);

CREATE TABLE branch_progress (
    function_name TEXT NOT NULL,
    branch        TEXT NOT NULL,
    match_percent REAL NOT NULL,
    scratch_slug  TEXT,
    is_committed  INTEGER NOT NULL DEFAULT 0,
    commit_hash   TEXT,
    agent_id      TEXT,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (function_name, branch)
);

CREATE TABLE agents (
    agent_id      TEXT PRIMARY KEY,
    worktree_path TEXT,
    branch        TEXT,
    last_seen_at  TEXT NOT NULL
);

CREATE TABLE audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    action      TEXT NOT NULL,
    old_value   TEXT,
    new_value   TEXT,
    agent_id    TEXT,
    metadata    TEXT
);
CREATE INDEX idx_audit_log_entity ON audit_log(entity_type, entity_id, timestamp);
CREATE INDEX idx_audit_log_timestamp ON audit_log(timestamp);
";

/// Shared helper: insert one row into `audit_log`. Every state-changing
/// public method calls this exactly once, inside its own transaction
/// ("every state-changing API call emits exactly one audit entry in the
/// same transaction").
pub(crate) fn log_audit(
    tx: &rusqlite::Transaction<'_>,
    entity_type: crate::model::EntityType,
    entity_id: &str,
    action: &str,
    old_value: Option<&serde_json::Value>,
    new_value: Option<&serde_json::Value>,
    agent_id: Option<&str>,
    metadata: Option<&serde_json::Value>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO audit_log
            (timestamp, entity_type, entity_id, action, old_value, new_value, agent_id, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            chrono::Utc::now().to_rfc3339(),
            entity_type.as_db_str(),
            entity_id,
            action,
            old_value.map(serde_json::Value::to_string),
            new_value.map(serde_json::Value::to_string),
            agent_id,
            metadata.map(serde_json::Value::to_string),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_creates_schema() {
        let store = Store::open_in_memory().unwrap();
        let version: i64 = store
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.db");
        {
            let _store = Store::open(&path).unwrap();
        }
        let _store2 = Store::open(&path).unwrap();
    }
}

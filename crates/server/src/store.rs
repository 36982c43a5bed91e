//! Snapshot storage: one sqlite row per game-state id.
//!
//! The server never inspects snapshot contents beyond checking that a put
//! carries a JSON object; tolerating unknown or missing fields is the
//! client's job on read-back.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde_json::Value;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn open(&self) -> anyhow::Result<Connection> {
        if let Some(dir) = self.db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create db dir: {}", dir.display()))?;
        }

        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open sqlite db: {}", self.db_path.display()))?;

        // Durable + fast defaults.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        migrate(&conn)?;
        Ok(conn)
    }

    /// Latest stored snapshot for `id`, if any. Rows that no longer parse as
    /// JSON are reported as errors, not silently dropped.
    pub fn get(&self, id: &str) -> anyhow::Result<Option<Value>> {
        let conn = self.open()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT state_json FROM game_states WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(text) => {
                let value = serde_json::from_str(&text)
                    .with_context(|| format!("corrupt state_json for id {id}"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Upsert the snapshot for `id`, bumping the revision counter. Returns
    /// the new revision.
    pub fn put(&self, id: &str, state: &Value) -> anyhow::Result<i64> {
        let conn = self.open()?;
        let now = now_ms();
        let text = serde_json::to_string(state)?;
        conn.execute(
            "INSERT INTO game_states (id, state_json, created_at_ms, updated_at_ms, rev)
             VALUES (?1, ?2, ?3, ?3, 1)
             ON CONFLICT(id) DO UPDATE SET
               state_json = excluded.state_json,
               updated_at_ms = excluded.updated_at_ms,
               rev = game_states.rev + 1",
            (id, text, now),
        )?;
        let rev: i64 = conn.query_row(
            "SELECT rev FROM game_states WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(rev)
    }
}

// Lightweight migrations: `user_version` + IF NOT EXISTS.
fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let v: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if v < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS game_states (
               id TEXT PRIMARY KEY,
               state_json TEXT NOT NULL,
               created_at_ms INTEGER NOT NULL,
               updated_at_ms INTEGER NOT NULL,
               rev INTEGER NOT NULL DEFAULT 1
             );",
        )?;
        conn.pragma_update(None, "user_version", 1_i64)?;
    }
    Ok(())
}

//! SQLite-backed key-value store.
//!
//! Keys live in `kv_keys`, whose autoincrement id doubles as the scan cursor.
//! Overwriting a key keeps its id, so a scan in progress neither skips nor
//! repeats keys that are merely updated. List payloads live in
//! `kv_list_items`, ordered by their own autoincrement id.

use super::{KvError, KvStore, ScanPage};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS kv_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    value BLOB,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS kv_list_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    list_key TEXT NOT NULL,
    value BLOB NOT NULL,
    appended_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kv_list_items_key ON kv_list_items(list_key, id);
"#;

const KIND_VALUE: &str = "value";
const KIND_LIST: &str = "list";

#[derive(Clone)]
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    pub fn new(db_path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("open kv db")?;
        let store = Self::with_connection(conn)?;
        info!(path = db_path, "key-value store opened");
        Ok(store)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory kv db")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("initialize kv schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn key_kind(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT kind FROM kv_keys WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let conn = self.conn.lock().await;
        let row: Option<(String, Option<Vec<u8>>)> = conn
            .query_row(
                "SELECT kind, value FROM kv_keys WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((kind, value)) if kind == KIND_VALUE => Ok(Some(value.unwrap_or_default())),
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO kv_keys (key, kind, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                kind = excluded.kind,
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, KIND_VALUE, value, Utc::now().timestamp()],
        )?;
        // A plain write replaces whatever the key held before, lists included.
        tx.execute(
            "DELETE FROM kv_list_items WHERE list_key = ?1",
            params![key],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn scan(&self, cursor: u64, batch: usize) -> Result<ScanPage, KvError> {
        let batch = batch.max(1);
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare_cached("SELECT id, key FROM kv_keys WHERE id > ?1 ORDER BY id LIMIT ?2")?;
        let rows = stmt
            .query_map(params![cursor as i64, batch as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let next = if rows.len() == batch {
            rows.last().map(|(id, _)| *id as u64)
        } else {
            None
        };
        let keys = rows.into_iter().map(|(_, key)| key).collect();

        Ok(ScanPage { keys, next })
    }

    async fn append_to_list(&self, key: &str, value: &[u8]) -> Result<u64, KvError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let now = Utc::now().timestamp();

        match key_kind(&tx, key)?.as_deref() {
            Some(KIND_LIST) => {}
            Some(_) => {
                return Err(KvError::WrongType {
                    key: key.to_string(),
                })
            }
            None => {
                tx.execute(
                    "INSERT INTO kv_keys (key, kind, value, updated_at) VALUES (?1, ?2, NULL, ?3)",
                    params![key, KIND_LIST, now],
                )?;
            }
        }

        tx.execute(
            "INSERT INTO kv_list_items (list_key, value, appended_at) VALUES (?1, ?2, ?3)",
            params![key, value, now],
        )?;
        let len: i64 = tx.query_row(
            "SELECT COUNT(*) FROM kv_list_items WHERE list_key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(len as u64)
    }

    async fn list_len(&self, key: &str) -> Result<u64, KvError> {
        let conn = self.conn.lock().await;
        match key_kind(&conn, key)?.as_deref() {
            None => Ok(0),
            Some(KIND_LIST) => {
                let len: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM kv_list_items WHERE list_key = ?1",
                    params![key],
                    |row| row.get(0),
                )?;
                Ok(len as u64)
            }
            Some(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }
}

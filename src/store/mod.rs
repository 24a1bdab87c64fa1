//! Key-Value Store Adapters
//!
//! Narrow get/set/scan/append contract over the backing key-value store.
//! String values and lists share one keyspace, so a scan also yields list
//! keys and callers must filter those out themselves.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Operation against a key holding the wrong kind of value.
    #[error("wrong type for key {key}")]
    WrongType { key: String },
}

/// One batch of a cursor scan. `next == None` means the keyspace is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub keys: Vec<String>,
    pub next: Option<u64>,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Unconditional overwrite, no TTL.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// Pages through every key, values and lists alike. Start with cursor 0.
    /// Keys inserted or removed while a scan is in progress may or may not be
    /// reported, and a key may appear twice.
    async fn scan(&self, cursor: u64, batch: usize) -> Result<ScanPage, KvError>;

    /// Appends to the tail of the list at `key`, returning the new length.
    async fn append_to_list(&self, key: &str, value: &[u8]) -> Result<u64, KvError>;

    async fn list_len(&self, key: &str) -> Result<u64, KvError>;
}

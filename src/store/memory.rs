//! In-process key-value store.

use super::{KvError, KvStore, ScanPage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Entry {
    Value(Vec<u8>),
    List(Vec<Vec<u8>>),
}

/// Ordered in-memory store; the scan cursor is an offset into key order.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        match self.entries.lock().get(key) {
            Some(Entry::Value(v)) => Ok(Some(v.clone())),
            Some(Entry::List(_)) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        self.entries
            .lock()
            .insert(key.to_string(), Entry::Value(value.to_vec()));
        Ok(())
    }

    async fn scan(&self, cursor: u64, batch: usize) -> Result<ScanPage, KvError> {
        let entries = self.entries.lock();
        let start = cursor as usize;
        let batch = batch.max(1);

        let keys = entries.keys().skip(start).take(batch).cloned().collect();

        let end = start + batch;
        let next = (end < entries.len()).then_some(end as u64);
        Ok(ScanPage { keys, next })
    }

    async fn append_to_list(&self, key: &str, value: &[u8]) -> Result<u64, KvError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(Vec::new()));
        match entry {
            Entry::List(items) => {
                items.push(value.to_vec());
                Ok(items.len() as u64)
            }
            Entry::Value(_) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn list_len(&self, key: &str) -> Result<u64, KvError> {
        match self.entries.lock().get(key) {
            Some(Entry::List(items)) => Ok(items.len() as u64),
            Some(Entry::Value(_)) => Err(KvError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scan_everything(store: &MemoryKvStore, batch: usize) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = 0;
        loop {
            let page = store.scan(cursor, batch).await.unwrap();
            out.extend(page.keys);
            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryKvStore::new();
        assert!(store.get("AAPL").await.unwrap().is_none());

        store.set("AAPL", b"first").await.unwrap();
        store.set("AAPL", b"second").await.unwrap();
        assert_eq!(store.get("AAPL").await.unwrap().unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_scan_pages_cover_keyspace() {
        let store = MemoryKvStore::new();
        for key in ["A", "B", "C", "D", "E"] {
            store.set(key, b"{}").await.unwrap();
        }

        for batch in [1, 2, 3, 5, 100] {
            let keys = scan_everything(&store, batch).await;
            assert_eq!(keys, vec!["A", "B", "C", "D", "E"], "batch {batch}");
        }
    }

    #[tokio::test]
    async fn test_lists_share_keyspace() {
        let store = MemoryKvStore::new();
        store.set("AAPL", b"{}").await.unwrap();
        assert_eq!(store.append_to_list("updates", b"1").await.unwrap(), 1);
        assert_eq!(store.append_to_list("updates", b"2").await.unwrap(), 2);

        let keys = scan_everything(&store, 10).await;
        assert!(keys.contains(&"updates".to_string()));

        assert!(matches!(
            store.get("updates").await,
            Err(KvError::WrongType { .. })
        ));
        assert!(matches!(
            store.append_to_list("AAPL", b"x").await,
            Err(KvError::WrongType { .. })
        ));
        assert_eq!(store.list_len("updates").await.unwrap(), 2);
        assert_eq!(store.list_len("missing").await.unwrap(), 0);
    }
}

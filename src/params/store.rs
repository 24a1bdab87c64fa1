//! Parameter Record Store
//! Current per-ticker simulation parameters, keyed by ticker.

use crate::error::{CoreError, Result};
use crate::models::{StockParameter, StoredParameter};
use crate::store::{KvError, KvStore};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_SCAN_BATCH: usize = 100;

#[derive(Clone)]
pub struct ParameterStore {
    kv: Arc<dyn KvStore>,
    audit_key: String,
    scan_batch: usize,
}

impl ParameterStore {
    /// `audit_key` names the audit list, which shares the keyspace and is
    /// never reported as a ticker.
    pub fn new(kv: Arc<dyn KvStore>, audit_key: impl Into<String>) -> Self {
        Self {
            kv,
            audit_key: audit_key.into(),
            scan_batch: DEFAULT_SCAN_BATCH,
        }
    }

    pub fn with_scan_batch(mut self, batch: usize) -> Self {
        self.scan_batch = batch.max(1);
        self
    }

    pub async fn get(&self, ticker: &str) -> Result<StockParameter> {
        let bytes = match self.kv.get(ticker).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(CoreError::NotFound(ticker.to_string())),
            Err(KvError::WrongType { .. }) => {
                return Err(CoreError::Decode {
                    key: ticker.to_string(),
                    reason: "key does not hold a parameter record".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice::<StoredParameter>(&bytes)
            .map(|stored| stored.into_parameter(ticker))
            .map_err(|e| CoreError::Decode {
                key: ticker.to_string(),
                reason: e.to_string(),
            })
    }

    pub async fn set(&self, ticker: &str, param: &StockParameter) -> Result<()> {
        let payload = serde_json::to_vec(param)
            .map_err(|e| CoreError::Store(format!("encode {ticker}: {e}")))?;
        self.kv.set(ticker, &payload).await?;
        Ok(())
    }

    /// Pages through the whole keyspace, excluding the audit list.
    ///
    /// Not a snapshot: tickers written mid-scan may or may not appear. When
    /// `cancel` fires the tickers collected so far are returned.
    pub async fn scan_all(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut tickers = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = 0u64;

        loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(collected = tickers.len(), "ticker scan cancelled, returning partial result");
                    return Ok(tickers);
                }
                page = self.kv.scan(cursor, self.scan_batch) => page?,
            };

            for key in page.keys {
                if key == self.audit_key {
                    continue;
                }
                if seen.insert(key.clone()) {
                    tickers.push(key);
                }
            }

            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        debug!(count = tickers.len(), "ticker scan complete");
        Ok(tickers)
    }
}

use crate::error::{CoreError, Result};
use crate::models::StockParameter;
use crate::store::KvStore;
use std::sync::Arc;
use tracing::debug;

/// Append-only record of every attempted parameter update, held in a list
/// separate from the keyed parameter state.
#[derive(Clone)]
pub struct AuditTrail {
    kv: Arc<dyn KvStore>,
    key: String,
}

impl AuditTrail {
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }

    pub async fn append(&self, snapshot: &StockParameter) -> Result<()> {
        let payload = serde_json::to_vec(snapshot)
            .map_err(|e| CoreError::Store(format!("encode audit record: {e}")))?;
        let len = self.kv.append_to_list(&self.key, &payload).await?;
        debug!(ticker = %snapshot.ticker, len, "audit record appended");
        Ok(())
    }

    pub async fn len(&self) -> Result<u64> {
        Ok(self.kv.list_len(&self.key).await?)
    }
}

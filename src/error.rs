//! Error taxonomy shared by the parameter and time-series cores.

use thiserror::Error;

use crate::store::KvError;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Requested key or ticker is absent.
    #[error("ticker not found: {0}")]
    NotFound(String),

    /// Stored payload does not match the expected shape.
    #[error("failed to decode record for {key}: {reason}")]
    Decode { key: String, reason: String },

    /// Backing store unreachable or rejected the operation.
    #[error("store error: {0}")]
    Store(String),

    /// Caller supplied no tickers or a malformed request.
    #[error("invalid request: {0}")]
    Validation(String),
}

impl CoreError {
    /// Batch operations skip items failing with these instead of aborting.
    pub fn is_skippable(&self) -> bool {
        matches!(self, CoreError::NotFound(_) | CoreError::Decode { .. })
    }
}

impl From<KvError> for CoreError {
    fn from(err: KvError) -> Self {
        CoreError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::Store(format!("time-series backend: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skippable_classification() {
        assert!(CoreError::NotFound("AAPL".into()).is_skippable());
        assert!(CoreError::Decode {
            key: "AAPL".into(),
            reason: "bad json".into()
        }
        .is_skippable());
        assert!(!CoreError::Store("down".into()).is_skippable());
        assert!(!CoreError::Validation("empty".into()).is_skippable());
    }

    #[test]
    fn test_kv_error_maps_to_store() {
        let err: CoreError = KvError::Backend("connection refused".into()).into();
        match err {
            CoreError::Store(msg) => assert!(msg.contains("connection refused")),
            other => panic!("Expected Store error, got {other:?}"),
        }
    }
}

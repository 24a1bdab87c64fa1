//! Data Models
//! Stock parameters, time-series samples and the client-facing response shapes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Simulation parameters for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockParameter {
    pub ticker: String,
    pub open: f64,
    pub drift: f64,
    pub volatility: f64,
}

/// Payload as found in the key-value store. Seeded records may omit the
/// ticker, in which case the key is authoritative.
#[derive(Debug, Deserialize)]
pub(crate) struct StoredParameter {
    #[serde(default)]
    pub ticker: Option<String>,
    pub open: f64,
    pub drift: f64,
    pub volatility: f64,
}

impl StoredParameter {
    pub fn into_parameter(self, key: &str) -> StockParameter {
        if let Some(stored) = self.ticker.as_deref() {
            if stored != key {
                tracing::debug!(key, stored, "stored ticker differs from key, using key");
            }
        }
        StockParameter {
            ticker: key.to_string(),
            open: self.open,
            drift: self.drift,
            volatility: self.volatility,
        }
    }
}

/// One record as delivered by the time-series backend, before coercion.
/// Fields that could not be read as the expected type are `None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSample {
    pub ticker: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub value: Option<f64>,
}

impl RawSample {
    pub fn new(ticker: &str, time: DateTime<Utc>, value: f64) -> Self {
        Self {
            ticker: Some(ticker.to_string()),
            time: Some(time),
            value: Some(value),
        }
    }
}

/// A coerced sample. `timestamp` is a fixed-width UTC RFC 3339 string, so
/// lexicographic order equals chronological order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub ticker: String,
    pub timestamp: String,
    pub value: f64,
}

impl TryFrom<RawSample> for Sample {
    type Error = &'static str;

    fn try_from(raw: RawSample) -> Result<Self, Self::Error> {
        let ticker = raw.ticker.filter(|t| !t.is_empty()).ok_or("missing ticker")?;
        let time = raw.time.ok_or("missing timestamp")?;
        let value = raw.value.filter(|v| v.is_finite()).ok_or("non-numeric value")?;
        Ok(Sample {
            ticker,
            timestamp: format_timestamp(&time),
            value,
        })
    }
}

/// Second-precision, `Z`-suffixed RFC 3339.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
pub struct TickerRequest {
    #[serde(default)]
    pub tickers: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateParametersRequest {
    pub ticker: String,
    pub drift: f64,
    pub volatility: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TickersResponse {
    pub tickers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StockParametersResponse {
    pub stocks: Vec<StockParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub ticker: String,
    pub prices: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryResponse {
    pub price_history: Vec<PriceRow>,
    pub timestamp: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPrice {
    pub ticker: String,
    pub price: f64,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedResponse {
    pub feed: Vec<LatestPrice>,
}

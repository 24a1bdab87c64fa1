//! Price query construction and the time-series source contract.
//!
//! Tickers are interpolated into the Flux predicate, so every ticker must
//! pass the alphanumeric allow-list before a query can be built.

use crate::error::{CoreError, Result};
use crate::models::{format_timestamp, RawSample};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

pub const MAX_TICKER_LEN: usize = 16;
pub const DEFAULT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignMode {
    /// Full window, aligned onto the union of observed timestamps.
    DenseHistory,
    /// Most recent sample per ticker.
    LatestSnapshot,
}

/// Where prices live in the time-series backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesLocation {
    pub bucket: String,
    pub measurement: String,
    pub field: String,
}

impl Default for SeriesLocation {
    fn default() -> Self {
        Self {
            bucket: "StockPricing".to_string(),
            measurement: "stocks".to_string(),
            field: "price".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuery {
    pub location: SeriesLocation,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub tickers: Vec<String>,
    pub mode: AlignMode,
}

/// Rejects empty lists and anything outside `[A-Za-z0-9]{1,16}`.
/// Duplicates are dropped, first occurrence kept; case is preserved.
pub fn validate_tickers(tickers: &[String]) -> Result<Vec<String>> {
    if tickers.is_empty() {
        return Err(CoreError::Validation("No tickers provided".to_string()));
    }

    let mut seen = HashSet::with_capacity(tickers.len());
    let mut valid = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let ok = !ticker.is_empty()
            && ticker.len() <= MAX_TICKER_LEN
            && ticker.chars().all(|c| c.is_ascii_alphanumeric());
        if !ok {
            return Err(CoreError::Validation(format!(
                "invalid ticker {ticker:?}: expected 1-{MAX_TICKER_LEN} ASCII letters or digits"
            )));
        }
        if seen.insert(ticker.as_str()) {
            valid.push(ticker.clone());
        }
    }
    Ok(valid)
}

impl PriceQuery {
    pub fn new(
        location: SeriesLocation,
        tickers: &[String],
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        mode: AlignMode,
    ) -> Result<Self> {
        if start >= stop {
            return Err(CoreError::Validation(
                "query window start must precede stop".to_string(),
            ));
        }
        Ok(Self {
            location,
            start,
            stop,
            tickers: validate_tickers(tickers)?,
            mode,
        })
    }

    /// Window ending now.
    pub fn last_window(
        location: SeriesLocation,
        tickers: &[String],
        window: Duration,
        mode: AlignMode,
    ) -> Result<Self> {
        let stop = Utc::now();
        let start = stop
            .checked_sub_signed(window)
            .ok_or_else(|| CoreError::Validation("query window out of range".to_string()))?;
        Self::new(location, tickers, start, stop, mode)
    }

    pub fn to_flux(&self) -> String {
        let set = self
            .tickers
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(", ");

        let mut flux = format!(
            "from(bucket: {bucket})\n  \
             |> range(start: {start}, stop: {stop})\n  \
             |> filter(fn: (r) => r[\"_measurement\"] == {measurement})\n  \
             |> filter(fn: (r) => r[\"_field\"] == {field})\n  \
             |> filter(fn: (r) => contains(value: r[\"ticker\"], set: [{set}]))",
            bucket = flux_string(&self.location.bucket),
            start = format_timestamp(&self.start),
            stop = format_timestamp(&self.stop),
            measurement = flux_string(&self.location.measurement),
            field = flux_string(&self.location.field),
        );
        if self.mode == AlignMode::LatestSnapshot {
            flux.push_str("\n  |> last()");
        }
        flux
    }

    /// Same predicate as the rendered Flux, for in-process sources.
    pub fn matches(&self, ticker: &str, time: &DateTime<Utc>) -> bool {
        *time >= self.start && *time < self.stop && self.tickers.iter().any(|t| t == ticker)
    }
}

/// Quoted Flux string literal. Escapes `\`, `"` and `$` (interpolation).
fn flux_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '\\' | '"' | '$' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Issues a bounded, ticker-filtered range query against a time-series
/// backend and yields its raw records, in whatever order the backend emits.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn query(&self, query: &PriceQuery, cancel: &CancellationToken)
        -> Result<Vec<RawSample>>;
}

/// Fixed in-memory samples, filtered per query.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceSource {
    samples: Vec<RawSample>,
}

impl StaticPriceSource {
    pub fn new(samples: Vec<RawSample>) -> Self {
        Self { samples }
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn query(
        &self,
        query: &PriceQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawSample>> {
        if cancel.is_cancelled() {
            return Err(CoreError::Store("time-series query cancelled".to_string()));
        }
        // Records with unreadable tag/time pass through, as a real backend
        // would hand them over; the alignment engine drops them.
        Ok(self
            .samples
            .iter()
            .filter(|s| match (&s.ticker, &s.time) {
                (Some(ticker), Some(time)) => query.matches(ticker, time),
                (Some(ticker), None) => query.tickers.contains(ticker),
                (None, Some(time)) => *time >= query.start && *time < query.stop,
                (None, None) => true,
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tickers(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_validate_tickers() {
        assert_eq!(
            validate_tickers(&tickers(&["AAPL", "msft", "AAPL", "BRK1"])).unwrap(),
            tickers(&["AAPL", "msft", "BRK1"])
        );
        assert!(matches!(
            validate_tickers(&[]),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_injection() {
        for bad in [
            "AAPL\"]) |> drop(columns: [\"_value",
            "AA PL",
            "",
            "BRK.B",
            "ÄPPL",
            "ABCDEFGHIJKLMNOPQ",
        ] {
            let result = validate_tickers(&tickers(&["MSFT", bad]));
            assert!(
                matches!(result, Err(CoreError::Validation(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_flux_rendering() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let stop = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let query = PriceQuery::new(
            SeriesLocation::default(),
            &tickers(&["AAPL", "MSFT"]),
            start,
            stop,
            AlignMode::DenseHistory,
        )
        .unwrap();

        let flux = query.to_flux();
        assert!(flux.starts_with("from(bucket: \"StockPricing\")"));
        assert!(flux.contains("range(start: 2024-03-01T00:00:00Z, stop: 2024-03-02T00:00:00Z)"));
        assert!(flux.contains("r[\"_measurement\"] == \"stocks\""));
        assert!(flux.contains("r[\"_field\"] == \"price\""));
        assert!(flux.contains("set: [\"AAPL\", \"MSFT\"]"));
        assert!(!flux.contains("last()"));

        let latest = PriceQuery {
            mode: AlignMode::LatestSnapshot,
            ..query
        };
        assert!(latest.to_flux().ends_with("|> last()"));
    }

    #[test]
    fn test_flux_string_escaping() {
        assert_eq!(flux_string("plain"), "\"plain\"");
        assert_eq!(flux_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(flux_string("${x}"), "\"\\${x}\"");
    }

    #[test]
    fn test_window_must_be_ordered() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let result = PriceQuery::new(
            SeriesLocation::default(),
            &tickers(&["AAPL"]),
            t,
            t,
            AlignMode::DenseHistory,
        );
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_oversized_window_is_rejected() {
        let result = PriceQuery::last_window(
            SeriesLocation::default(),
            &tickers(&["AAPL"]),
            Duration::days(365 * 1_000_000),
            AlignMode::DenseHistory,
        );
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_static_source_filters_by_ticker_and_window() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let source = StaticPriceSource::new(vec![
            RawSample::new("AAPL", t0, 1.0),
            RawSample::new("MSFT", t0, 2.0),
            RawSample::new("AAPL", t0 - Duration::days(3), 3.0),
        ]);
        let query = PriceQuery::new(
            SeriesLocation::default(),
            &tickers(&["AAPL"]),
            t0 - Duration::hours(24),
            t0 + Duration::minutes(1),
            AlignMode::DenseHistory,
        )
        .unwrap();

        let samples = source.query(&query, &CancellationToken::new()).await.unwrap();
        assert_eq!(samples, vec![RawSample::new("AAPL", t0, 1.0)]);
    }
}

//! Time-Series Alignment Engine
//!
//! Turns the unordered per-ticker samples of one range query into either a
//! dense, timestamp-aligned matrix or a latest-value-per-ticker snapshot.
//!
//! Timestamps are compared as strings. That is sound because samples carry
//! second-precision `…Z` RFC 3339 timestamps (see `models::format_timestamp`),
//! for which lexicographic order equals chronological order.
//!
//! Records whose ticker, time or value cannot be coerced are skipped and
//! counted; they never fail the query. Tickers with no samples in the window
//! are absent from the output, indistinguishable from unknown tickers.

use super::query::AlignMode;
use crate::models::{
    FeedResponse, LatestPrice, PriceHistoryResponse, PriceRow, RawSample, Sample,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Gap fill for tickers without a sample at an axis timestamp.
pub const FILL_VALUE: f64 = 0.0;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DenseHistory {
    /// Strictly increasing, no duplicates.
    pub timestamps: Vec<String>,
    /// One row per observed ticker, ascending by ticker; each row has
    /// `timestamps.len()` values.
    pub rows: Vec<PriceRow>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LatestSnapshot {
    /// Ascending by ticker.
    pub entries: Vec<LatestPrice>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Alignment {
    Dense(DenseHistory),
    Latest(LatestSnapshot),
}

pub fn align<I>(samples: I, mode: AlignMode) -> Alignment
where
    I: IntoIterator<Item = RawSample>,
{
    match mode {
        AlignMode::DenseHistory => Alignment::Dense(dense_history(samples)),
        AlignMode::LatestSnapshot => Alignment::Latest(latest_snapshot(samples)),
    }
}

/// Drops records that do not coerce to a `Sample`, logging how many.
fn coerce<I>(samples: I) -> impl Iterator<Item = Sample>
where
    I: IntoIterator<Item = RawSample>,
{
    let mut skipped = 0usize;
    let mut iter = samples.into_iter();
    std::iter::from_fn(move || loop {
        match iter.next() {
            Some(raw) => match Sample::try_from(raw) {
                Ok(sample) => return Some(sample),
                Err(reason) => {
                    skipped += 1;
                    debug!(reason, "skipping time-series record");
                }
            },
            None => {
                if skipped > 0 {
                    warn!(skipped, "time-series records skipped during alignment");
                    skipped = 0;
                }
                return None;
            }
        }
    })
}

pub fn dense_history<I>(samples: I) -> DenseHistory
where
    I: IntoIterator<Item = RawSample>,
{
    let mut by_ticker: BTreeMap<String, HashMap<String, f64>> = BTreeMap::new();
    let mut axis: BTreeSet<String> = BTreeSet::new();

    for sample in coerce(samples) {
        axis.insert(sample.timestamp.clone());
        // Later duplicates for the same (ticker, timestamp) overwrite earlier ones.
        by_ticker
            .entry(sample.ticker)
            .or_default()
            .insert(sample.timestamp, sample.value);
    }

    let timestamps: Vec<String> = axis.into_iter().collect();
    let rows = by_ticker
        .into_iter()
        .map(|(ticker, points)| PriceRow {
            prices: timestamps
                .iter()
                .map(|ts| points.get(ts).copied().unwrap_or(FILL_VALUE))
                .collect(),
            ticker,
        })
        .collect();

    DenseHistory { timestamps, rows }
}

pub fn latest_snapshot<I>(samples: I) -> LatestSnapshot
where
    I: IntoIterator<Item = RawSample>,
{
    let mut best: BTreeMap<String, (String, f64)> = BTreeMap::new();

    for sample in coerce(samples) {
        match best.get_mut(&sample.ticker) {
            // `>=` so that, at equal timestamps, the later record wins.
            Some(current) if sample.timestamp >= current.0 => {
                *current = (sample.timestamp, sample.value);
            }
            Some(_) => {}
            None => {
                best.insert(sample.ticker, (sample.timestamp, sample.value));
            }
        }
    }

    LatestSnapshot {
        entries: best
            .into_iter()
            .map(|(ticker, (timestamp, price))| LatestPrice {
                ticker,
                price,
                timestamp,
            })
            .collect(),
    }
}

impl From<DenseHistory> for PriceHistoryResponse {
    fn from(history: DenseHistory) -> Self {
        Self {
            price_history: history.rows,
            timestamp: history.timestamps,
        }
    }
}

impl From<LatestSnapshot> for FeedResponse {
    fn from(snapshot: LatestSnapshot) -> Self {
        Self {
            feed: snapshot.entries,
        }
    }
}

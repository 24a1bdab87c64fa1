//! Startup seeding of the parameter store from a JSON or CSV file.
//!
//! Accepted shapes:
//! - `[{"ticker": "AAPL", "open": 180.0, "drift": 0.05, "volatility": 0.2}, ...]`
//! - `{"AAPL": {"open": 180.0, "drift": 0.05, "volatility": 0.2}, ...}`
//! - CSV (`.csv` files) whose first column holds the ticker, whatever its
//!   header, with `open`, `drift` and `volatility` columns anywhere after it
//!
//! Duplicate tickers keep their first occurrence.

use crate::models::StockParameter;
use crate::params::ParameterStore;
use crate::timeseries::validate_tickers;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct SeedValues {
    open: f64,
    drift: f64,
    volatility: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SeedFile {
    List(Vec<StockParameter>),
    Map(BTreeMap<String, SeedValues>),
}

pub fn parse_seed(json: &str) -> Result<Vec<StockParameter>> {
    let parsed: SeedFile = serde_json::from_str(json).context("Failed to parse seed data")?;
    let records = match parsed {
        SeedFile::List(list) => list,
        SeedFile::Map(map) => map
            .into_iter()
            .map(|(ticker, v)| StockParameter {
                ticker,
                open: v.open,
                drift: v.drift,
                volatility: v.volatility,
            })
            .collect(),
    };
    dedupe_and_validate(records)
}

pub fn parse_seed_csv(data: &str) -> Result<Vec<StockParameter>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let headers = reader.headers().context("Failed to read seed CSV header")?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .skip(1)
            .position(|h| h.eq_ignore_ascii_case(name))
            .map(|i| i + 1)
            .ok_or_else(|| anyhow!("Seed CSV has no {name} column"))
    };
    let (open, drift, volatility) = (column("open")?, column("drift")?, column("volatility")?);

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("Invalid seed CSV row {}", line + 2))?;
        let number = |idx: usize| -> Result<f64> {
            let cell = row.get(idx).unwrap_or_default();
            cell.parse::<f64>()
                .with_context(|| format!("Invalid number {cell:?} in seed CSV row {}", line + 2))
        };
        records.push(StockParameter {
            ticker: row.get(0).unwrap_or_default().to_string(),
            open: number(open)?,
            drift: number(drift)?,
            volatility: number(volatility)?,
        });
    }
    dedupe_and_validate(records)
}

fn dedupe_and_validate(records: Vec<StockParameter>) -> Result<Vec<StockParameter>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(records.len());
    for record in records {
        if seen.insert(record.ticker.clone()) {
            unique.push(record);
        } else {
            warn!(ticker = %record.ticker, "duplicate ticker in seed data, keeping first");
        }
    }

    let tickers: Vec<String> = unique.iter().map(|r| r.ticker.clone()).collect();
    if !tickers.is_empty() {
        validate_tickers(&tickers).context("Seed data contains an invalid ticker")?;
    }
    Ok(unique)
}

pub fn load_seed_file(path: &Path) -> Result<Vec<StockParameter>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        parse_seed_csv(&raw)
    } else {
        parse_seed(&raw)
    }
}

/// Overwrites each record in the store. Returns how many were written.
pub async fn apply(store: &ParameterStore, records: &[StockParameter]) -> Result<usize> {
    for record in records {
        store
            .set(&record.ticker, record)
            .await
            .with_context(|| format!("Failed to seed {}", record.ticker))?;
    }
    info!(count = records.len(), "parameter store seeded");
    Ok(records.len())
}

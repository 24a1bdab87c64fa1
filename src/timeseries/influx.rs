//! InfluxDB v2 query adapter.
//!
//! Posts the rendered Flux to `/api/v2/query` and decodes the CSV response.
//! Columns are located by header name per table, so column order and extra
//! columns do not matter. Cells that do not parse become `None` and are left
//! for the alignment engine to skip.

use super::query::{PriceQuery, PriceSource};
use crate::error::{CoreError, Result};
use crate::models::RawSample;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord};
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone)]
pub struct InfluxPriceSource {
    client: Client,
    base_url: String,
    org: String,
}

impl InfluxPriceSource {
    pub fn new(base_url: &str, token: &str, org: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Token {}", token)
                        .parse()
                        .context("Invalid InfluxDB token")?,
                );
                headers.insert(
                    reqwest::header::ACCEPT,
                    reqwest::header::HeaderValue::from_static("application/csv"),
                );
                headers
            })
            .build()
            .context("Failed to build InfluxDB client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            org: org.to_string(),
        })
    }

    async fn fetch(&self, flux: String) -> Result<String> {
        let body = serde_json::json!({
            "query": flux,
            "type": "flux",
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": [],
                "dateTimeFormat": "RFC3339",
            },
        });

        let resp = self
            .client
            .post(format!("{}/api/v2/query", self.base_url))
            .query(&[("org", self.org.as_str())])
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(CoreError::Store(format!(
                "POST /api/v2/query {}: {}",
                status,
                text.trim()
            )));
        }

        Ok(resp.text().await?)
    }
}

#[async_trait]
impl PriceSource for InfluxPriceSource {
    async fn query(
        &self,
        query: &PriceQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawSample>> {
        let flux = query.to_flux();
        debug!(flux = %flux, "issuing time-series query");

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CoreError::Store("time-series query cancelled".to_string()));
            }
            body = self.fetch(flux) => body?,
        };

        let samples = parse_query_csv(&body)?;
        debug!(records = samples.len(), "time-series query returned");
        Ok(samples)
    }
}

#[derive(Debug, Default)]
struct Columns {
    time: Option<usize>,
    value: Option<usize>,
    ticker: Option<usize>,
    error: Option<usize>,
}

impl Columns {
    /// Every table opens with a header row naming `_time`/`_value`, or
    /// `error` for an error table.
    fn is_header(record: &StringRecord) -> bool {
        record
            .iter()
            .any(|f| matches!(f, "_time" | "_value" | "error"))
    }

    fn from_header(record: &StringRecord) -> Self {
        let find = |name: &str| record.iter().position(|f| f == name);
        Self {
            time: find("_time"),
            value: find("_value"),
            ticker: find("ticker"),
            error: find("error"),
        }
    }

    fn is_error_table(&self) -> bool {
        self.error.is_some() && self.time.is_none()
    }

    fn record(&self, record: &StringRecord) -> RawSample {
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i));
        RawSample {
            ticker: cell(self.ticker)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            time: cell(self.time)
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            value: cell(self.value).and_then(|v| v.parse::<f64>().ok()),
        }
    }
}

/// Decodes a (possibly multi-table) Flux CSV response. Each table starts
/// with its own header row; annotation rows start with `#`. Quoted fields
/// may span lines. An error table aborts with `StoreError`.
pub fn parse_query_csv(body: &str) -> Result<Vec<RawSample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(body.as_bytes());

    let mut samples = Vec::new();
    let mut columns: Option<Columns> = None;

    for record in reader.records() {
        let record = record
            .map_err(|e| CoreError::Store(format!("malformed time-series response: {e}")))?;

        if record.iter().all(str::is_empty) {
            columns = None;
            continue;
        }
        if Columns::is_header(&record) {
            columns = Some(Columns::from_header(&record));
            continue;
        }

        match columns.as_ref() {
            None => debug!("time-series row before any header, skipping"),
            Some(cols) if cols.is_error_table() => {
                let message = cols.error.and_then(|i| record.get(i)).unwrap_or_default();
                return Err(CoreError::Store(format!(
                    "time-series query failed: {message}"
                )));
            }
            Some(cols) => samples.push(cols.record(&record)),
        }
    }

    Ok(samples)
}

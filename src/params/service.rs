//! Parameter Service
//!
//! Read-all, read-subset and update-with-audit over the record store and the
//! audit trail. Batch reads are best-effort: a missing or undecodable ticker
//! is logged and skipped. Single-item operations propagate the first error.

use super::{AuditTrail, ParameterStore};
use crate::error::{CoreError, Result};
use crate::models::StockParameter;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-ticker outcome of a batch lookup, in request order.
pub type LookupResults = Vec<(String, Result<StockParameter>)>;

#[derive(Clone)]
pub struct ParameterService {
    store: ParameterStore,
    audit: AuditTrail,
}

impl ParameterService {
    pub fn new(store: ParameterStore, audit: AuditTrail) -> Self {
        Self { store, audit }
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Order is whatever the backing scan yields.
    pub async fn list_tickers(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.store.scan_all(cancel).await
    }

    /// Looks up every ticker, keeping each outcome.
    pub async fn lookup_each(&self, tickers: &[String]) -> LookupResults {
        let mut results = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let outcome = self.store.get(ticker).await;
            results.push((ticker.clone(), outcome));
        }
        results
    }

    /// Successful records in input order. Never fails because of one key;
    /// a short result does not imply an error.
    pub async fn get_parameters(&self, tickers: &[String]) -> Vec<StockParameter> {
        let mut stocks = Vec::with_capacity(tickers.len());
        for (ticker, outcome) in self.lookup_each(tickers).await {
            match outcome {
                Ok(param) => stocks.push(param),
                Err(e) => warn!(ticker = %ticker, error = %e, "skipping ticker"),
            }
        }
        stocks
    }

    /// Replaces drift and volatility on an existing record, keeping `open`.
    ///
    /// The audit entry is appended before the state write, so a failed write
    /// still leaves a trace of the attempt.
    pub async fn update_parameters(
        &self,
        ticker: &str,
        drift: f64,
        volatility: f64,
    ) -> Result<StockParameter> {
        validate_update(drift, volatility)?;

        let current = self.store.get(ticker).await?;
        let updated = StockParameter {
            ticker: ticker.to_string(),
            open: current.open,
            drift,
            volatility,
        };

        self.audit.append(&updated).await?;
        self.store.set(ticker, &updated).await?;

        info!(
            ticker,
            drift,
            volatility,
            previous_drift = current.drift,
            previous_volatility = current.volatility,
            "parameters updated"
        );
        Ok(updated)
    }
}

fn validate_update(drift: f64, volatility: f64) -> Result<()> {
    if !drift.is_finite() {
        return Err(CoreError::Validation("drift must be a finite number".into()));
    }
    if !volatility.is_finite() || volatility < 0.0 {
        return Err(CoreError::Validation(
            "volatility must be a finite, non-negative number".into(),
        ));
    }
    Ok(())
}

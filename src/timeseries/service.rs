use super::align::{align, Alignment};
use super::query::{AlignMode, PriceQuery, PriceSource, SeriesLocation, DEFAULT_WINDOW_HOURS};
use crate::error::Result;
use chrono::Duration;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Validates tickers, queries the trailing window and aligns the result.
#[derive(Clone)]
pub struct PriceHistoryService {
    source: Arc<dyn PriceSource>,
    location: SeriesLocation,
    window: Duration,
}

impl PriceHistoryService {
    pub fn new(source: Arc<dyn PriceSource>, location: SeriesLocation) -> Self {
        Self {
            source,
            location,
            window: Duration::hours(DEFAULT_WINDOW_HOURS),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Runs the trailing-window query for `mode` and aligns its records the
    /// same way: a dense matrix for history, one price per ticker otherwise.
    pub async fn aligned(
        &self,
        tickers: &[String],
        mode: AlignMode,
        cancel: &CancellationToken,
    ) -> Result<Alignment> {
        let query = self.build(tickers, mode)?;
        let samples = self.source.query(&query, cancel).await?;
        let alignment = align(samples, query.mode);
        match &alignment {
            Alignment::Dense(history) => info!(
                requested = query.tickers.len(),
                returned = history.rows.len(),
                points = history.timestamps.len(),
                "price history aligned"
            ),
            Alignment::Latest(snapshot) => debug!(
                requested = query.tickers.len(),
                returned = snapshot.entries.len(),
                "latest prices collected"
            ),
        }
        Ok(alignment)
    }

    fn build(&self, tickers: &[String], mode: AlignMode) -> Result<PriceQuery> {
        PriceQuery::last_window(self.location.clone(), tickers, self.window, mode)
    }
}

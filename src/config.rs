//! Server configuration.
//!
//! Every flag can also come from the environment (after `.env` loading), so
//! container deployments configure the server purely through variables.

use crate::params::{DEFAULT_AUDIT_KEY, DEFAULT_SCAN_BATCH};
use crate::timeseries::SeriesLocation;
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAX_WINDOW_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KvBackend {
    Sqlite,
    Memory,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "stocksim-bff")]
#[command(about = "Backend-for-frontend for stock simulation parameters and price history")]
pub struct BffConfig {
    /// Address the HTTP server binds to
    #[arg(long, env = "BFF_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Key-value backend holding parameters and the audit trail
    #[arg(long, env = "KV_BACKEND", value_enum, default_value = "sqlite")]
    pub kv_backend: KvBackend,

    /// SQLite file for the sqlite backend
    #[arg(long, env = "KV_DB_PATH", default_value = "stocksim_params.db")]
    pub kv_db_path: String,

    /// List key of the audit trail
    #[arg(long, env = "AUDIT_KEY", default_value = DEFAULT_AUDIT_KEY)]
    pub audit_key: String,

    /// Keys fetched per scan page
    #[arg(long, env = "SCAN_BATCH_SIZE", default_value_t = DEFAULT_SCAN_BATCH)]
    pub scan_batch_size: usize,

    /// InfluxDB base URL; history and feed endpoints are disabled without it
    #[arg(long, env = "INFLUXDB_V2_URL")]
    pub influx_url: Option<String>,

    #[arg(long, env = "INFLUXDB_V2_TOKEN", default_value = "", hide_env_values = true)]
    pub influx_token: String,

    /// InfluxDB organization (required alongside the URL)
    #[arg(long, env = "INFLUXDB_V2_ORG")]
    pub influx_org: Option<String>,

    #[arg(long, env = "INFLUX_BUCKET", default_value = "StockPricing")]
    pub influx_bucket: String,

    #[arg(long, env = "INFLUX_MEASUREMENT", default_value = "stocks")]
    pub influx_measurement: String,

    #[arg(long, env = "INFLUX_FIELD", default_value = "price")]
    pub influx_field: String,

    #[arg(long, env = "INFLUX_TIMEOUT_SECS", default_value_t = 10)]
    pub influx_timeout_secs: u64,

    /// Trailing window for history and feed queries, at most one year
    #[arg(
        long,
        env = "HISTORY_WINDOW_HOURS",
        default_value_t = 24,
        value_parser = clap::value_parser!(i64).range(1..=MAX_WINDOW_HOURS)
    )]
    pub history_window_hours: i64,

    /// Origin allowed by CORS
    #[arg(long, env = "CORS_ORIGIN", default_value = "http://localhost:3000")]
    pub cors_origin: String,

    /// JSON or CSV file of initial parameters written at startup
    #[arg(long, env = "SEED_FILE")]
    pub seed_file: Option<PathBuf>,
}

/// Connection settings for the time-series backend, present only when both
/// URL and organization are configured.
#[derive(Debug, Clone)]
pub struct InfluxSettings {
    pub url: String,
    pub token: String,
    pub org: String,
    pub timeout: Duration,
}

impl BffConfig {
    pub fn influx(&self) -> Option<InfluxSettings> {
        let url = self.influx_url.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let org = self.influx_org.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some(InfluxSettings {
            url: url.to_string(),
            token: self.influx_token.clone(),
            org: org.to_string(),
            timeout: Duration::from_secs(self.influx_timeout_secs),
        })
    }

    pub fn series_location(&self) -> SeriesLocation {
        SeriesLocation {
            bucket: self.influx_bucket.clone(),
            measurement: self.influx_measurement.clone(),
            field: self.influx_field.clone(),
        }
    }

    pub fn history_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.history_window_hours)
    }
}

/// Applies `.env` from the working directory (or a parent) and then from the
/// crate root, so every `env = ...` flag can come from either. Values already
/// in the environment win. Returns the files applied, for logging once
/// tracing is up.
pub fn load_dotenv() -> Vec<PathBuf> {
    let mut loaded: Vec<PathBuf> = dotenv::dotenv().ok().into_iter().collect();
    let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    loaded.extend(apply_env_files(&[crate_env], &loaded));
    loaded
}

fn apply_env_files(candidates: &[PathBuf], already: &[PathBuf]) -> Vec<PathBuf> {
    candidates
        .iter()
        .filter(|p| p.exists() && !already.contains(*p))
        .filter(|p| dotenv::from_path(p).is_ok())
        .cloned()
        .collect()
}

//! stocksim-bff server
//!
//! Opens the parameter store and the optional time-series source, applies
//! the seed file, and serves the JSON API until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stocksim_bff::{
    api::{cors_layer, create_router, AppState},
    config::{load_dotenv, BffConfig, KvBackend},
    params::{AuditTrail, ParameterService, ParameterStore},
    seed,
    store::{KvStore, MemoryKvStore, SqliteKvStore},
    timeseries::{InfluxPriceSource, PriceHistoryService},
};

#[tokio::main]
async fn main() -> Result<()> {
    let env_files = load_dotenv();
    init_tracing();
    for path in &env_files {
        debug!(path = %path.display(), "environment file applied");
    }

    let config = BffConfig::parse();
    info!(bind = %config.bind, backend = ?config.kv_backend, "starting stocksim-bff");

    let kv: Arc<dyn KvStore> = match config.kv_backend {
        KvBackend::Sqlite => {
            let store = SqliteKvStore::new(&config.kv_db_path)
                .with_context(|| format!("Failed to open {}", config.kv_db_path))?;
            info!(path = %config.kv_db_path, "parameter store opened");
            Arc::new(store)
        }
        KvBackend::Memory => {
            warn!("using in-memory parameter store; state is lost on exit");
            Arc::new(MemoryKvStore::new())
        }
    };

    let store = ParameterStore::new(kv.clone(), config.audit_key.clone())
        .with_scan_batch(config.scan_batch_size);
    let audit = AuditTrail::new(kv, config.audit_key.clone());

    if let Some(path) = &config.seed_file {
        let records = seed::load_seed_file(path)?;
        seed::apply(&store, &records).await?;
    }

    let prices = match config.influx() {
        Some(influx) => {
            let source =
                InfluxPriceSource::new(&influx.url, &influx.token, &influx.org, influx.timeout)?;
            info!(url = %influx.url, bucket = %config.influx_bucket, "time-series source configured");
            Some(
                PriceHistoryService::new(Arc::new(source), config.series_location())
                    .with_window(config.history_window()),
            )
        }
        None => {
            if config.influx_url.is_some() {
                warn!("INFLUXDB_V2_URL set without INFLUXDB_V2_ORG; history and feed disabled");
            } else {
                warn!("no time-series backend configured; history and feed disabled");
            }
            None
        }
    };

    let shutdown = CancellationToken::new();
    let state = AppState::new(ParameterService::new(store, audit), prices)
        .with_shutdown(shutdown.clone());

    let app = create_router(state)
        .layer(cors_layer(&config.cors_origin)?)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("API server listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        return;
    }
    info!("shutdown requested");
    shutdown.cancel();
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stocksim_bff=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

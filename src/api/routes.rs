use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::error::CoreError;
use crate::middleware::request_logging;
use crate::models::{
    FeedResponse, PriceHistoryResponse, StockParameter, StockParametersResponse, TickerRequest,
    TickersResponse, UpdateParametersRequest,
};
use crate::params::ParameterService;
use crate::timeseries::{AlignMode, Alignment, PriceHistoryService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub params: ParameterService,
    /// `None` when no time-series backend is configured.
    pub prices: Option<PriceHistoryService>,
    /// Root token; each request derives a child so shutdown aborts
    /// in-flight scans and queries.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(params: ParameterService, prices: Option<PriceHistoryService>) -> Self {
        Self {
            params,
            prices,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn price_service(&self) -> Result<&PriceHistoryService, ApiError> {
        self.prices.as_ref().ok_or_else(|| {
            ApiError::Unavailable("time-series backend is not configured".to_string())
        })
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/tickers", get(list_tickers))
        .route("/api/v1/stocks", post(get_stocks).put(update_stock))
        .route("/api/v1/stocks/history", post(price_history))
        .route("/api/v1/stocks/feed", post(price_feed))
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}

/// CORS policy for the single browser origin serving the frontend.
pub fn cors_layer(origin: &str) -> anyhow::Result<CorsLayer> {
    let origin: HeaderValue = origin
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid CORS origin: {origin}"))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]))
}

// ===== Route Handlers =====

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timeseries: state.prices.is_some(),
    })
}

async fn list_tickers(State(state): State<AppState>) -> Result<Json<TickersResponse>, ApiError> {
    let cancel = state.shutdown.child_token();
    let tickers = state.params.list_tickers(&cancel).await?;
    Ok(Json(TickersResponse { tickers }))
}

async fn get_stocks(
    State(state): State<AppState>,
    payload: Result<Json<TickerRequest>, JsonRejection>,
) -> Result<Json<StockParametersResponse>, ApiError> {
    let Json(request) = payload?;
    require_tickers(&request.tickers)?;

    let stocks = state.params.get_parameters(&request.tickers).await;
    Ok(Json(StockParametersResponse { stocks }))
}

async fn update_stock(
    State(state): State<AppState>,
    payload: Result<Json<UpdateParametersRequest>, JsonRejection>,
) -> Result<Json<StockParameter>, ApiError> {
    let Json(request) = payload?;
    if request.ticker.trim().is_empty() {
        return Err(ApiError::BadRequest("No ticker provided".to_string()));
    }

    let updated = state
        .params
        .update_parameters(&request.ticker, request.drift, request.volatility)
        .await?;
    Ok(Json(updated))
}

async fn price_history(
    State(state): State<AppState>,
    payload: Result<Json<TickerRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    aligned_prices(&state, payload, AlignMode::DenseHistory).await
}

async fn price_feed(
    State(state): State<AppState>,
    payload: Result<Json<TickerRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    aligned_prices(&state, payload, AlignMode::LatestSnapshot).await
}

async fn aligned_prices(
    state: &AppState,
    payload: Result<Json<TickerRequest>, JsonRejection>,
    mode: AlignMode,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    require_tickers(&request.tickers)?;

    let cancel = state.shutdown.child_token();
    let alignment = state
        .price_service()?
        .aligned(&request.tickers, mode, &cancel)
        .await?;

    Ok(match alignment {
        Alignment::Dense(history) => Json(PriceHistoryResponse::from(history)).into_response(),
        Alignment::Latest(snapshot) => Json(FeedResponse::from(snapshot)).into_response(),
    })
}

fn require_tickers(tickers: &[String]) -> Result<(), ApiError> {
    if tickers.is_empty() {
        return Err(ApiError::BadRequest("No tickers provided".to_string()));
    }
    Ok(())
}

// ===== Request/Response Types =====

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    timeseries: bool,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
    Unavailable(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            CoreError::Validation(msg) => ApiError::BadRequest(msg),
            CoreError::Decode { .. } | CoreError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!("Backend error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawSample;
    use crate::params::{AuditTrail, ParameterStore};
    use crate::store::{KvStore, MemoryKvStore};
    use crate::timeseries::{SeriesLocation, StaticPriceSource};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::{Duration, DurationRound, Utc};
    use std::sync::Arc;
    use tower::ServiceExt;

    const AUDIT_KEY: &str = "parameter_updates";

    async fn seeded_params() -> (ParameterService, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        let store = ParameterStore::new(kv.clone(), AUDIT_KEY);
        for (ticker, open) in [("AAPL", 180.0), ("MSFT", 410.0)] {
            let param = StockParameter {
                ticker: ticker.to_string(),
                open,
                drift: 0.05,
                volatility: 0.2,
            };
            store.set(ticker, &param).await.unwrap();
        }
        let audit = AuditTrail::new(kv.clone(), AUDIT_KEY);
        (ParameterService::new(store, audit), kv)
    }

    fn price_service() -> PriceHistoryService {
        let now = Utc::now().duration_trunc(Duration::seconds(1)).unwrap();
        let source = StaticPriceSource::new(vec![
            RawSample::new("AAPL", now - Duration::minutes(2), 180.0),
            RawSample::new("AAPL", now - Duration::minutes(1), 181.5),
            RawSample::new("MSFT", now - Duration::minutes(1), 411.0),
        ]);
        PriceHistoryService::new(Arc::new(source), SeriesLocation::default())
    }

    async fn app(with_prices: bool) -> (Router, Arc<MemoryKvStore>) {
        let (params, kv) = seeded_params().await;
        let prices = with_prices.then(price_service);
        (create_router(AppState::new(params, prices)), kv)
    }

    fn json_request(method: Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = app(false).await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["timeseries"], false);
    }

    #[tokio::test]
    async fn test_list_tickers_excludes_audit_key() {
        let (app, kv) = app(false).await;
        kv.append_to_list(AUDIT_KEY, b"{}").await.unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/tickers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let mut tickers: Vec<String> = serde_json::from_value(body["tickers"].clone()).unwrap();
        tickers.sort();
        assert_eq!(tickers, vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn test_get_stocks_skips_unknown() {
        let (app, _) = app(false).await;
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/stocks",
                r#"{"tickers": ["MSFT", "NOPE", "AAPL"]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: StockParametersResponse =
            serde_json::from_value(body_json(response).await).unwrap();
        let names: Vec<&str> = body.stocks.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(names, vec!["MSFT", "AAPL"]);
    }

    #[tokio::test]
    async fn test_empty_tickers_is_bad_request() {
        for uri in ["/api/v1/stocks", "/api/v1/stocks/history", "/api/v1/stocks/feed"] {
            let (app, _) = app(false).await;
            let response = app
                .oneshot(json_request(Method::POST, uri, r#"{"tickers": []}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            let body = body_json(response).await;
            assert_eq!(body["error"], "No tickers provided");
        }
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (app, _) = app(false).await;
        let response = app
            .oneshot(json_request(Method::POST, "/api/v1/stocks", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_stock_preserves_open_and_audits() {
        let (app, kv) = app(false).await;
        let response = app
            .oneshot(json_request(
                Method::PUT,
                "/api/v1/stocks",
                r#"{"ticker": "AAPL", "drift": 0.07, "volatility": 0.3}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let updated: StockParameter = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(updated.open, 180.0);
        assert_eq!(updated.drift, 0.07);
        assert_eq!(kv.list_len(AUDIT_KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_ticker_not_found() {
        let (app, kv) = app(false).await;
        let response = app
            .oneshot(json_request(
                Method::PUT,
                "/api/v1/stocks",
                r#"{"ticker": "ZZZ", "drift": 0.01, "volatility": 0.1}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(kv.list_len(AUDIT_KEY).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_negative_volatility_rejected() {
        let (app, _) = app(false).await;
        let response = app
            .oneshot(json_request(
                Method::PUT,
                "/api/v1/stocks",
                r#"{"ticker": "AAPL", "drift": 0.01, "volatility": -0.1}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_history_dense_matrix() {
        let (app, _) = app(true).await;
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/stocks/history",
                r#"{"tickers": ["MSFT", "AAPL"]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: PriceHistoryResponse =
            serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body.timestamp.len(), 2);
        assert!(body.timestamp.iter().all(|t| t.ends_with('Z')));
        assert_eq!(body.price_history[0].ticker, "AAPL");
        assert_eq!(body.price_history[0].prices, vec![180.0, 181.5]);
        assert_eq!(body.price_history[1].prices, vec![0.0, 411.0]);
    }

    #[tokio::test]
    async fn test_feed_latest_prices() {
        let (app, _) = app(true).await;
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/stocks/feed",
                r#"{"tickers": ["AAPL", "MSFT"]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: FeedResponse = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(body.feed.len(), 2);
        assert_eq!(body.feed[0].ticker, "AAPL");
        assert_eq!(body.feed[0].price, 181.5);
    }

    #[tokio::test]
    async fn test_history_without_backend_unavailable() {
        let (app, _) = app(false).await;
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/stocks/history",
                r#"{"tickers": ["AAPL"]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_history_rejects_unsafe_ticker() {
        let (app, _) = app(true).await;
        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/stocks/history",
                r#"{"tickers": ["AAPL\"]) |> drop()"]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let (params, _) = seeded_params().await;
        let app = create_router(AppState::new(params, None))
            .layer(cors_layer("http://localhost:3000").unwrap());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/stocks")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "http://localhost:3000"
        );
    }

    #[test]
    fn test_cors_layer_rejects_bad_origin() {
        assert!(cors_layer("bad\norigin").is_err());
    }
}

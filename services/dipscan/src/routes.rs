//! HTTP routes for the screener service.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::data::CacheStatus;
use crate::display;
use crate::handler::GetStocksResponse;
use crate::scheduler::Prompt;
use crate::settings::{Settings, SettingsUpdate};
use crate::DipscanState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub cache: CacheStatus,
    pub settings: Settings,
    pub last_prompt_seq: Option<u64>,
    pub last_prompt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct StocksQuery {
    /// Defaults to the `maxInstruments` setting.
    pub max: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    /// `json` (default) or `text`.
    pub format: Option<String>,
}

/// Error mapped to its HTTP status.
pub struct ApiError(dipscan_common::Error);

impl From<dipscan_common::Error> for ApiError {
    fn from(e: dipscan_common::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: Arc<DipscanState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/messages", post(post_message))
        .route("/api/v1/stocks", get(get_stocks))
        .route("/api/v1/stocks/refresh", post(refresh_stocks))
        .route("/api/v1/stocks/latest", get(latest_stocks))
        .route("/api/v1/settings", get(get_settings).put(put_settings))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "dipscan".to_string(),
    })
}

/// Message boundary. Always answers 200 with `{stocks}` or `{error}`,
/// including for bodies that are not JSON.
pub async fn post_message(
    State(state): State<Arc<DipscanState>>,
    body: Bytes,
) -> Json<GetStocksResponse> {
    let response = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(message) => state.handler.handle_message(message).await,
        Err(e) => GetStocksResponse::error(format!("Invalid request: {}", e)),
    };
    Json(response)
}

/// Screened records, served from cache when fresh
pub async fn get_stocks(
    State(state): State<Arc<DipscanState>>,
    Query(query): Query<StocksQuery>,
) -> Json<GetStocksResponse> {
    let max = query.max.unwrap_or_else(|| state.settings.current().max_instruments);
    Json(state.handler.get_stocks(max).await)
}

/// Refetch, bypassing the cache
pub async fn refresh_stocks(
    State(state): State<Arc<DipscanState>>,
    Query(query): Query<StocksQuery>,
) -> Json<GetStocksResponse> {
    let max = query.max.unwrap_or_else(|| state.settings.current().max_instruments);
    Json(state.handler.refresh_stocks(max).await)
}

/// Last result published by the refresh scheduler
pub async fn latest_stocks(
    State(state): State<Arc<DipscanState>>,
    Query(query): Query<LatestQuery>,
) -> Response {
    let latest: Option<Prompt> = state.latest.borrow().clone();
    let Some(prompt) = latest else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No scheduled prompt has completed yet".to_string(),
            }),
        )
            .into_response();
    };

    match query.format.as_deref() {
        Some("text") => display::render(&prompt.response).into_response(),
        _ => Json(prompt).into_response(),
    }
}

pub async fn get_settings(State(state): State<Arc<DipscanState>>) -> Json<Settings> {
    Json(state.settings.current())
}

/// Validate, persist and broadcast new settings. Bad input is a 400.
pub async fn put_settings(
    State(state): State<Arc<DipscanState>>,
    body: Bytes,
) -> Result<Json<Settings>, ApiError> {
    let update: SettingsUpdate = serde_json::from_slice(&body)
        .map_err(|e| dipscan_common::Error::InvalidInput(e.to_string()))?;
    Ok(Json(state.settings.update(update)?))
}

/// Cache freshness, current settings and the last scheduled prompt
pub async fn get_status(State(state): State<Arc<DipscanState>>) -> Json<StatusResponse> {
    let (last_prompt_seq, last_prompt_at) = state
        .latest
        .borrow()
        .as_ref()
        .map_or((None, None), |p| (Some(p.seq), Some(p.at)));

    Json(StatusResponse {
        cache: state.handler.cache().status(),
        settings: state.settings.current(),
        last_prompt_seq,
        last_prompt_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::data::{QuoteCache, QuoteError, QuoteSource};
    use crate::handler::RequestHandler;
    use crate::screener::DipScreener;
    use crate::settings::{MemorySettingsStore, SettingsService};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use dipscan_common::Config;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tokio::sync::watch;
    use tower::ServiceExt;

    struct FailingSource;

    #[async_trait]
    impl QuoteSource for FailingSource {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn fetch_raw(&self, _codes: &[String]) -> Result<String, QuoteError> {
            Err(QuoteError::Network("HTTP 503 Service Unavailable".into()))
        }
    }

    fn create_test_state(latest: watch::Receiver<Option<Prompt>>) -> Arc<DipscanState> {
        let cache = QuoteCache::new(
            Arc::new(FailingSource),
            vec!["sh000001".to_string()],
            chrono::Duration::seconds(300),
            DipScreener::default(),
            Arc::new(SystemClock),
        );
        let settings = SettingsService::install(Arc::new(MemorySettingsStore::new())).unwrap();

        Arc::new(DipscanState {
            config: Config::default(),
            handler: RequestHandler::new(cache),
            settings,
            latest,
        })
    }

    async fn send(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Bytes) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    fn json_of(body: &Bytes) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_tx, rx) = watch::channel(None);
        let app = build_router(create_test_state(rx));

        let (status, body) = send(app, Method::GET, "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["service"], "dipscan");
    }

    #[tokio::test]
    async fn test_message_errors_are_payloads() {
        let (_tx, rx) = watch::channel(None);
        let state = create_test_state(rx);

        let (status, body) = send(
            build_router(state.clone()),
            Method::POST,
            "/api/v1/messages",
            r#"{"action":"getStocks","maxStocks":5}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json_of(&body),
            json!({ "error": "Network error: HTTP 503 Service Unavailable" })
        );

        let (status, body) =
            send(build_router(state.clone()), Method::POST, "/api/v1/messages", "not json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json_of(&body)["error"].as_str().unwrap().starts_with("Invalid request"));

        let (status, body) = send(
            build_router(state),
            Method::POST,
            "/api/v1/messages",
            r#"{"action":"dropTables"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json_of(&body).get("stocks").is_none());
    }

    #[tokio::test]
    async fn test_settings_roundtrip_and_validation() {
        let (_tx, rx) = watch::channel(None);
        let state = create_test_state(rx);
        let mut settings_rx = state.settings.subscribe();

        let (status, body) =
            send(build_router(state.clone()), Method::GET, "/api/v1/settings", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body), json!({ "refreshIntervalMinutes": 5, "maxInstruments": 10 }));

        let (status, body) = send(
            build_router(state.clone()),
            Method::PUT,
            "/api/v1/settings",
            r#"{"maxInstruments":0}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json_of(&body)["error"].as_str().unwrap().contains("maxInstruments"));

        let (status, _) = send(
            build_router(state.clone()),
            Method::PUT,
            "/api/v1/settings",
            r#"{"refreshIntervalMinutes":-3}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!settings_rx.has_changed().unwrap());

        let (status, body) = send(
            build_router(state.clone()),
            Method::PUT,
            "/api/v1/settings",
            r#"{"refreshIntervalMinutes":1}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body), json!({ "refreshIntervalMinutes": 1, "maxInstruments": 10 }));
        assert!(settings_rx.has_changed().unwrap());
        assert_eq!(settings_rx.borrow_and_update().refresh_interval_minutes, 1);
    }

    #[tokio::test]
    async fn test_latest_before_and_after_prompt() {
        let (tx, rx) = watch::channel(None);
        let state = create_test_state(rx);

        let (status, _) =
            send(build_router(state.clone()), Method::GET, "/api/v1/stocks/latest", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        tx.send_replace(Some(Prompt {
            seq: 1,
            at: Utc::now(),
            max_instruments: 10,
            response: GetStocksResponse::error("Network error: HTTP 503"),
        }));

        let (status, body) =
            send(build_router(state.clone()), Method::GET, "/api/v1/stocks/latest", "").await;
        assert_eq!(status, StatusCode::OK);
        let value = json_of(&body);
        assert_eq!(value["seq"], 1);
        assert_eq!(value["response"]["error"], "Network error: HTTP 503");

        let (status, body) = send(
            build_router(state.clone()),
            Method::GET,
            "/api/v1/stocks/latest?format=text",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], "获取数据失败: Network error: HTTP 503".as_bytes());

        let (_, body) = send(build_router(state), Method::GET, "/api/v1/status", "").await;
        let value = json_of(&body);
        assert_eq!(value["last_prompt_seq"], 1);
        assert_eq!(value["cache"]["cached_records"], 0);
        assert_eq!(value["settings"]["maxInstruments"], 10);
    }
}

//! Code Review Gateway
//!
//! Single-binary Rust service that:
//! 1. Accepts source code over `POST /review`
//! 2. Sends a reviewer prompt to Gemini, rotating across a pool of API keys
//! 3. Waits out rate limits in escalating cycles when every key is hot
//! 4. Returns the model's review as structured JSON

mod config;
mod error;
mod languages;
mod metrics;
mod rate_limit;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use key_pool::Pool;
use provider::{GeminiProvider, Provider};
use review::{ReviewRequest, Reviewer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::ServiceMetrics;
use crate::rate_limit::RateLimiter;

/// Source files are pasted whole, so the body limit is generous.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// How long in-flight reviews get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    reviewer: Arc<Reviewer>,
    metrics: ServiceMetrics,
    limiter: Arc<RateLimiter>,
    prometheus: PrometheusHandle,
}

/// Routes served both at the root and under `/api`. Only `/review` counts
/// against the inbound rate limit.
fn api_routes(limiter: Arc<RateLimiter>) -> Router<AppState> {
    Router::new()
        .route("/review", post(review_handler))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit::enforce))
        .route("/health", get(health_handler))
        .route("/languages", get(languages_handler))
        .route("/metrics", get(metrics_handler))
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let api = api_routes(state.limiter.clone());
    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting code-review-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::resolve(cli_config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.provider.base_url,
        model = %config.provider.model,
        keys = config.api_keys.len(),
        requests_per_minute = config.server.requests_per_minute,
        "configuration loaded"
    );
    if config.api_keys.is_empty() {
        warn!("no API keys configured, reviews will fail until GEMINI_API_KEYS is set");
    }

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let provider = Arc::new(GeminiProvider::new(
        client,
        config.provider.base_url.clone(),
        config.provider.model.clone(),
        Duration::from_secs(config.provider.timeout_secs),
    ));
    let pool = Arc::new(Pool::new(
        std::mem::take(&mut config.api_keys),
        config.rotation.selection_policy(),
    ));
    let reviewer = Arc::new(Reviewer::new(
        pool,
        provider,
        config.rotation.retry_policy(),
    ));

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        reviewer,
        metrics: metrics.clone(),
        limiter: Arc::new(RateLimiter::per_minute(config.server.requests_per_minute)),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // Clone in_flight counter for drain observability after shutdown
    let in_flight = metrics.in_flight.clone();

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race the drain against
    // the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// RFC 3339 UTC with millisecond precision.
fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Decrements the in-flight gauge even when the client goes away mid-review.
struct InFlight(Arc<AtomicU64>);

impl InFlight {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn review_handler(
    State(state): State<AppState>,
    body: std::result::Result<Json<ReviewRequest>, JsonRejection>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    run_review(&state, body, request_id).await
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn run_review(
    state: &AppState,
    body: std::result::Result<Json<ReviewRequest>, JsonRejection>,
    request_id: String,
) -> Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let _in_flight = InFlight::enter(&state.metrics.in_flight);
    let started = Instant::now();

    let result = match body {
        Ok(Json(request)) => state
            .reviewer
            .review(&request)
            .await
            .map_err(ApiError::from),
        Err(rejection) => Err(ApiError::from(rejection)),
    };

    let response = match result {
        Ok(review) => {
            info!(
                key = %review.key,
                attempts = review.attempts,
                wait_cycle = review.wait_cycle,
                parse = review.tier.label(),
                score = review.review.score,
                "review completed"
            );
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "review": review.review,
                    "timestamp": timestamp(),
                    "keyUsed": review.key,
                })),
            )
                .into_response()
        }
        Err(err) => {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            let status = err.status();
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                error!(status = status.as_u16(), error = %err, "review failed");
            } else {
                warn!(status = status.as_u16(), error = %err, "review rejected");
            }
            err.into_response()
        }
    };

    metrics::record_request(response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

/// Health endpoint: service counters plus the key pool summary.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.reviewer.pool();
    let body = serde_json::json!({
        "status": "ok",
        "timestamp": timestamp(),
        "apiKeysConfigured": pool.len(),
        "currentKeyIndex": pool.cursor(),
        "uptimeSeconds": state.metrics.started_at.elapsed().as_secs(),
        "requestsServed": state.metrics.requests_total.load(Ordering::Relaxed),
        "errorsTotal": state.metrics.errors_total.load(Ordering::Relaxed),
        "model": state.reviewer.provider().model(),
        "pool": pool.health(tokio::time::Instant::now()).await,
    });

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

async fn languages_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "languages": languages::LANGUAGES }))
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use key_pool::{RetryPolicy, SelectionPolicy, load_keys};
    use tower::ServiceExt;

    /// PrometheusHandle without installing a global recorder, so tests can
    /// run side by side in one process.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    /// App state talking to `base_url` with the given comma separated keys.
    /// No wait cycles, so exhaustion is immediate.
    fn test_app_state(base_url: &str, keys: &str, requests_per_minute: u32) -> AppState {
        let provider = Arc::new(GeminiProvider::new(
            reqwest::Client::new(),
            base_url,
            "gemini-2.0-flash",
            Duration::from_secs(5),
        ));
        let pool = Arc::new(Pool::new(load_keys(keys), SelectionPolicy::default()));
        let retry = RetryPolicy {
            max_wait_cycles: 0,
            ..RetryPolicy::default()
        };
        AppState {
            reviewer: Arc::new(Reviewer::new(pool, provider, retry)),
            metrics: ServiceMetrics::new(),
            limiter: Arc::new(RateLimiter::per_minute(requests_per_minute)),
            prometheus: test_prometheus_handle(),
        }
    }

    /// Mock Gemini endpoint answering every request with `status` and `body`.
    async fn start_gemini(status: StatusCode, body: serde_json::Value) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = Router::new().fallback(move || {
                let body = body.clone();
                async move { (status, Json(body)) }
            });
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn candidate(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }], "role": "model" } }]
        })
    }

    fn review_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn review_returns_structured_result() {
        let upstream = start_gemini(
            StatusCode::OK,
            candidate("```json\n{\"summary\":\"ok\",\"score\":5,\"bugs\":[],\"improvedCode\":\"x\",\"positives\":[]}\n```"),
        )
        .await;
        let state = test_app_state(&upstream, "test-key-abcdef", 30);
        let app = build_router(state, 1000);

        let (status, json) = send(
            app,
            review_request("/review", r#"{"code":"x = 1","language":"python"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["review"]["summary"], "ok");
        assert_eq!(json["review"]["score"], 5);
        assert_eq!(json["review"]["improvedCode"], "x");
        assert_eq!(json["keyUsed"], "...abcdef");
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(
            chrono::DateTime::parse_from_rfc3339(timestamp).is_ok(),
            "timestamp must be RFC 3339, got {timestamp}"
        );
    }

    #[tokio::test]
    async fn review_is_served_under_api_prefix() {
        let upstream = start_gemini(StatusCode::OK, candidate("Looks fine overall.")).await;
        let state = test_app_state(&upstream, "test-key-abcdef", 30);
        let app = build_router(state, 1000);

        let (status, json) = send(
            app,
            review_request("/api/review", r#"{"code":"print(1)","language":"python"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["review"]["summary"], "Looks fine overall.");
        assert_eq!(json["review"]["score"], 7);
        assert_eq!(json["review"]["improvedCode"], "print(1)");
        assert_eq!(json["review"]["positives"][0], "Code submitted for review");
    }

    #[tokio::test]
    async fn review_without_language_is_400() {
        let state = test_app_state("http://127.0.0.1:1", "test-key-abcdef", 30);
        let app = build_router(state, 1000);

        let (status, json) = send(app, review_request("/review", r#"{"code":"x = 1"}"#)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Code and language are required");
    }

    #[tokio::test]
    async fn review_with_non_json_body_is_400() {
        let state = test_app_state("http://127.0.0.1:1", "test-key-abcdef", 30);
        let app = build_router(state, 1000);

        let (status, json) = send(app, review_request("/review", "code=x")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["details"].is_string());
    }

    #[tokio::test]
    async fn review_without_keys_is_500() {
        let state = test_app_state("http://127.0.0.1:1", "", 30);
        let app = build_router(state, 1000);

        let (status, json) = send(
            app,
            review_request("/review", r#"{"code":"x = 1","language":"python"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("No API keys configured"));
    }

    #[tokio::test]
    async fn exhausted_keys_are_429() {
        let upstream = start_gemini(
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({
                "error": {
                    "code": 429,
                    "message": "Resource has been exhausted (e.g. check quota).",
                    "status": "RESOURCE_EXHAUSTED"
                }
            }),
        )
        .await;
        let state = test_app_state(&upstream, "key-one-111111,key-two-222222", 30);
        let app = build_router(state, 1000);

        let (status, json) = send(
            app,
            review_request("/review", r#"{"code":"x = 1","language":"python"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json["keysAvailable"], 2);
        assert!(json["details"].as_str().unwrap().contains("429"));
        assert!(json["suggestion"].is_string());
    }

    #[tokio::test]
    async fn inbound_rate_limit_rejects_excess_reviews() {
        let state = test_app_state("http://127.0.0.1:1", "test-key-abcdef", 1);
        let app = build_router(state, 1000);

        // First request passes the limiter (and fails validation).
        let (status, _) = send(app.clone(), review_request("/review", "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // The /api prefix shares the same window.
        let (status, json) = send(app.clone(), review_request("/api/review", "{}")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json["retryAfter"], 60);

        // Health is not rate limited.
        let (status, _) = send(
            app,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let state = test_app_state("http://unused", "key-one-111111,key-two-222222", 30);
        state.metrics.requests_total.fetch_add(5, Ordering::Relaxed);
        let app = build_router(state, 1000);

        for uri in ["/health", "/api/health"] {
            let (status, json) = send(
                app.clone(),
                Request::builder().uri(uri).body(Body::empty()).unwrap(),
            )
            .await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["status"], "ok");
            assert_eq!(json["apiKeysConfigured"], 2);
            assert_eq!(json["currentKeyIndex"], 0);
            assert_eq!(json["requestsServed"], 5);
            assert!(json["uptimeSeconds"].is_u64());
            assert!(json["timestamp"].is_string());
            assert_eq!(json["pool"]["keys_ready"], 2);
            assert_eq!(json["pool"]["status"], "healthy");
        }
    }

    #[tokio::test]
    async fn health_never_exposes_raw_keys() {
        let state = test_app_state("http://unused", "secret-key-value-987654", 30);
        let app = build_router(state, 1000);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("secret-key-value"));
        assert!(text.contains("...987654"));
    }

    #[tokio::test]
    async fn languages_endpoint_lists_sixteen() {
        let state = test_app_state("http://unused", "", 30);
        let app = build_router(state, 1000);

        let (status, json) = send(
            app,
            Request::builder()
                .uri("/api/languages")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let languages = json["languages"].as_array().unwrap();
        assert_eq!(languages.len(), 16);
        assert_eq!(languages[0]["id"], "javascript");
        assert_eq!(languages[0]["name"], "JavaScript");
        assert_eq!(languages[0]["extension"], "js");
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let state = test_app_state("http://unused", "", 30);
        let app = build_router(state, 1000);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let state = test_app_state("http://unused", "", 30);
        let app = build_router(state, 1000);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let state = test_app_state("http://unused", "test-key-abcdef", 30);
        let app = build_router(state, 1000);
        let code = "a".repeat(MAX_BODY_BYTES);
        let body = format!(r#"{{"code":"{code}","language":"python"}}"#);

        let (status, json) = send(app, review_request("/review", &body)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["error"], "request body too large");
    }

    #[test]
    fn in_flight_guard_balances_counter() {
        let counter = Arc::new(AtomicU64::new(0));
        {
            let _guard = InFlight::enter(&counter);
            assert_eq!(counter.load(Ordering::Relaxed), 1);
        }
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}

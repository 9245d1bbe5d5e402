//! HTTP management API.
//!
//! Provides:
//! - `/health` - liveness and version
//! - `/sources` - active sources snapshot
//! - `/policies` - policy listing, creation and deletion
//! - `/metrics` - Prometheus metrics of this process
//! - `/metrics/query` - proxy to the local Prometheus query API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

#[cfg(feature = "metrics")]
use crate::metrics::PrometheusMetrics;
use crate::store::{Policy, SourceStore};

/// Management API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the API.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Allow cross-origin requests.
    #[serde(default = "default_cors")]
    pub cors: bool,
}

fn default_enabled() -> bool {
    true
}
fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4884))
}
fn default_cors() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bind: default_bind(),
            cors: default_cors(),
        }
    }
}

/// Shared state for handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<SourceStore>,
    /// Port of the local Prometheus server behind `/metrics/query`.
    pub prometheus_port: u16,
    #[cfg(feature = "metrics")]
    pub metrics: Option<Arc<PrometheusMetrics>>,
    client: reqwest::Client,
}

impl ApiState {
    pub fn new(store: Arc<SourceStore>, prometheus_port: u16) -> Self {
        Self {
            store,
            prometheus_port,
            #[cfg(feature = "metrics")]
            metrics: None,
            client: reqwest::Client::new(),
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<PrometheusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Management HTTP server.
pub struct ApiServer {
    config: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: ApiState) -> Self {
        Self { config, state }
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind).await?;
        info!("Management API listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/sources", get(sources_handler))
            .route("/policies", get(policies_handler))
            .route("/policies/:id", delete(policy_delete_handler))
            .route("/policies/block", post(block_handler))
            .route("/policies/reserve", post(reserve_handler))
            .route("/policies/avoid", post(avoid_handler))
            .route("/policies/stick", post(stick_handler))
            .route("/metrics/query", get(metrics_query_handler).post(metrics_query_handler));

        #[cfg(feature = "metrics")]
        let router = router.route("/metrics", get(metrics_handler));

        let router = router
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.cors {
            router.layer(CorsLayer::new().allow_origin(Any))
        } else {
            router
        }
    }
}

/// Body accepted by every `POST /policies/...` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyInput {
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub issuer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub alive: bool,
    pub version: String,
    pub metrics_port: u16,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, err: impl std::fmt::Display) -> Response {
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        alive: true,
        version: crate::VERSION.to_string(),
        metrics_port: state.prometheus_port,
    })
}

async fn sources_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(serde_json::json!({ "sources": state.store.get_sources_snapshot() }))
}

async fn policies_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(serde_json::json!({ "policies": state.store.get_policies_snapshot() }))
}

async fn policy_delete_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.del_policy(&id) {
        Ok(policy) => (StatusCode::OK, Json(policy)).into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, e),
    }
}

fn create_policy(
    state: &ApiState,
    payload: Result<Json<PolicyInput>, JsonRejection>,
    build: impl FnOnce(&PolicyInput) -> Policy,
) -> Response {
    let Json(input) = match payload {
        Ok(input) => input,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let policy = build(&input).with_reason(input.reason.clone());
    match state.store.append_policy(policy.clone()) {
        Ok(()) => (StatusCode::CREATED, Json(policy)).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

async fn block_handler(
    State(state): State<ApiState>,
    payload: Result<Json<PolicyInput>, JsonRejection>,
) -> Response {
    create_policy(&state, payload, |i| Policy::block(&i.issuer, &i.source_id))
}

async fn reserve_handler(
    State(state): State<ApiState>,
    payload: Result<Json<PolicyInput>, JsonRejection>,
) -> Response {
    create_policy(&state, payload, |i| {
        Policy::reserved(&i.issuer, &i.source_id, &i.target)
    })
}

async fn avoid_handler(
    State(state): State<ApiState>,
    payload: Result<Json<PolicyInput>, JsonRejection>,
) -> Response {
    create_policy(&state, payload, |i| {
        Policy::avoid(&i.issuer, &i.source_id, &i.target)
    })
}

async fn stick_handler(
    State(state): State<ApiState>,
    payload: Result<Json<PolicyInput>, JsonRejection>,
) -> Response {
    create_policy(&state, payload, |i| Policy::sticky(&i.issuer, &i.target))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<ApiState>) -> Response {
    let Some(metrics) = state.metrics else {
        return error_response(StatusCode::NOT_FOUND, "metrics disabled");
    };
    match metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        ),
    }
}

/// Forward to `http://localhost:{port}/api/v1/query`, keeping method, query
/// string, headers and body. Compressed responses are decoded by the client.
async fn metrics_query_handler(
    State(state): State<ApiState>,
    method: Method,
    RawQuery(query): RawQuery,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut url = format!("http://localhost:{}/api/v1/query", state.prometheus_port);
    if let Some(query) = query {
        url.push('?');
        url.push_str(&query);
    }
    debug!("Forwarding metrics query to {}", url);

    headers.remove(header::HOST);
    headers.remove(header::ACCEPT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);

    let upstream = state
        .client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let response = match upstream {
        Ok(response) => response,
        Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    };
    match response.bytes().await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<SourceStore>) {
        let store = Arc::new(SourceStore::new());
        let server = ApiServer::new(ApiConfig::default(), ApiState::new(store.clone(), 9090));
        (server.router(), store)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["alive"], true);
        assert_eq!(body["version"], crate::VERSION);
        assert_eq!(body["metrics_port"], 9090);
    }

    #[tokio::test]
    async fn test_block_requires_source_id() {
        let (app, store) = app();
        let response = app
            .oneshot(post("/policies/block", r#"{"issuer":"admin"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "validation error: source_id cannot be empty");
        assert!(store.get_policies_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (app, _) = app();
        let response = app
            .oneshot(post("/policies/avoid", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_create_and_delete_policy() {
        let (app, store) = app();

        let response = app
            .clone()
            .oneshot(post(
                "/policies/reserve",
                r#"{"source_id":"eth0","target":"x.com","reason":"vpn","issuer":"ops"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["id"], "reserve_eth0_x.com");
        assert_eq!(body["kind"], "reserved");
        assert_eq!(body["reason"], "vpn");
        assert_eq!(store.get_policies_snapshot().len(), 1);

        let response = app
            .clone()
            .oneshot(
                Request::delete("/policies/reserve_eth0_x.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.get_policies_snapshot().is_empty());

        let response = app
            .oneshot(
                Request::delete("/policies/reserve_eth0_x.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_stick_accepts_empty_fields() {
        let (app, _) = app();
        let response = app
            .oneshot(post("/policies/stick", r#"{"issuer":"app"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["kind"], "sticky");
    }

    #[tokio::test]
    async fn test_duplicate_policy_rejected() {
        let (app, _) = app();
        let first = app
            .clone()
            .oneshot(post("/policies/block", r#"{"source_id":"eth0"}"#))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app
            .oneshot(post("/policies/block", r#"{"source_id":"eth0"}"#))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_listings() {
        let (app, store) = app();
        store.append_policy(Policy::block("ops", "wlan0")).unwrap();

        let response = app
            .clone()
            .oneshot(Request::get("/policies").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["policies"][0]["id"], "block_wlan0");

        let response = app
            .oneshot(Request::get("/sources").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["sources"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_metrics_query_upstream_down() {
        // Reserve a port and release it so nothing listens there.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let store = Arc::new(SourceStore::new());
        let app = ApiServer::new(ApiConfig::default(), ApiState::new(store, port)).router();

        let response = app
            .oneshot(
                Request::get("/metrics/query?query=up")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_query_forwards() {
        let upstream = Router::new().route(
            "/api/v1/query",
            get(|RawQuery(q): RawQuery| async move {
                Json(serde_json::json!({ "status": "success", "query": q }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, upstream).await });

        let store = Arc::new(SourceStore::new());
        let app = ApiServer::new(ApiConfig::default(), ApiState::new(store, port)).router();
        let response = app
            .oneshot(
                Request::get("/metrics/query?query=up")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["query"], "query=up");
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn test_metrics_exposition() {
        use crate::metrics::MetricsSink;

        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        metrics.source_admitted("eth0");
        let store = Arc::new(SourceStore::new());
        let state = ApiState::new(store, 9090).with_metrics(metrics);
        let app = ApiServer::new(ApiConfig::default(), state).router();

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#"multihome_sources_admitted_total{source="eth0"} 1"#));
    }
}

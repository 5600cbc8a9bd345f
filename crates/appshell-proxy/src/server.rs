//! HTTP server for the app-shell gateway
//!
//! Provides /health, /config.js and /__appshell/message. Every other request
//! is intercepted: routed through the worker's strategies when it is
//! controlling, or forwarded to the origin untouched.

use appshell_worker::{
    route, Fetch, FetchRequest, FetchResponse, Lifecycle, MessageOutcome, ResponseSource, Route,
    StrategyRunner,
};
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::runtime_config::RuntimeConfig;
use crate::types::{ErrorResponse, HealthResponse};

/// Largest request body forwarded to the origin
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared state for the HTTP server
pub struct ServerState {
    pub lifecycle: Arc<Lifecycle>,
    pub runner: StrategyRunner,
    /// Used for requests the worker does not intercept
    pub fetcher: Arc<dyn Fetch>,
    /// Rendered `/config.js`
    pub config_script: String,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(lifecycle: Arc<Lifecycle>, fetcher: Arc<dyn Fetch>, runtime: &RuntimeConfig) -> Self {
        let runner = lifecycle.runner();
        Self {
            lifecycle,
            runner,
            fetcher,
            config_script: runtime.render(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    let control = Router::new()
        .route("/health", get(health))
        .route("/__appshell/message", post(post_message))
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/config.js", get(config_script))
        .merge(control)
        .fallback(intercept)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let config = state.lifecycle.config();
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        state: state.lifecycle.state().await,
        profile: config.profile,
        core_cache: config.cache_names.core.clone(),
        runtime_cache: config.cache_names.runtime.clone(),
        cache: state.lifecycle.cache().stats().await,
    })
}

async fn config_script(State(state): State<SharedState>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/javascript; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        state.config_script.clone(),
    )
        .into_response()
}

/// Deliver a message to the worker. Bodies that are not JSON are treated
/// like any other unrecognised message.
async fn post_message(State(state): State<SharedState>, body: Bytes) -> Response {
    let message: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
    let (port, reply) = oneshot::channel();

    match state.lifecycle.handle_message(&message, Some(port)).await {
        Ok(MessageOutcome::VersionSent) => match reply.await {
            Ok(version) => Json(version).into_response(),
            Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "No reply from worker"),
        },
        Ok(outcome) => {
            debug!(?outcome, "Message handled");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to handle message");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to handle message")
        }
    }
}

/// Every request not claimed by the gateway's own routes
async fn intercept(State(state): State<SharedState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let origin = &state.lifecycle.config().origin;
    let Some(url) = target_url(origin, &parts.uri) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request target");
    };
    // Only the configured origin is ever contacted
    if url.origin() != origin.origin() {
        warn!(url = %url, "Rejecting request for a foreign authority");
        return error_response(
            StatusCode::MISDIRECTED_REQUEST,
            "Request target is not served by this gateway",
        );
    }

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!(url = %url, error = %e, "Failed to read request body");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };

    let fetch_request = FetchRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body,
    };

    let decision = if state.lifecycle.is_controlling().await {
        route(
            &fetch_request.method,
            &fetch_request.url,
            origin,
            state.lifecycle.config().profile,
        )
    } else {
        Route::Passthrough
    };

    match decision {
        Route::Passthrough => match state.fetcher.fetch(&fetch_request).await {
            Ok(response) => into_response(response, None),
            Err(e) => {
                warn!(method = %fetch_request.method, url = %fetch_request.url, error = %e, "Passthrough failed");
                error_response(StatusCode::BAD_GATEWAY, "Upstream unavailable")
            }
        },
        Route::Handle(strategy) => match state.runner.serve(strategy, &fetch_request).await {
            Ok(served) => {
                debug!(url = %fetch_request.url, ?strategy, source = ?served.source, "Served");
                into_response(served.response, Some(served.source))
            }
            Err(e) => {
                warn!(url = %fetch_request.url, ?strategy, error = %e, "No strategy could serve request");
                error_response(StatusCode::BAD_GATEWAY, "Failed to fetch")
            }
        },
    }
}

/// Resolve the request target. Origin-form targets are joined onto the
/// origin; absolute-form targets are kept as they are and checked by the
/// caller.
fn target_url(origin: &Url, uri: &Uri) -> Option<Url> {
    if uri.authority().is_some() {
        return Url::parse(&uri.to_string()).ok();
    }
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    origin.join(path).ok()
}

fn into_response(response: FetchResponse, source: Option<ResponseSource>) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;

    if let Some(source) = source {
        let value = match source {
            ResponseSource::Cache => "HIT",
            ResponseSource::Network => "MISS",
        };
        out.headers_mut()
            .insert("x-cache", HeaderValue::from_static(value));
    }
    out
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use appshell_cache::{CacheStorage, CachedResponse, MemoryCacheStorage};
    use appshell_worker::{CacheNames, HttpFetcher, WorkerConfig, WorkerError};
    use async_trait::async_trait;
    use axum::http::Method;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    const ORIGIN: &str = "http://localhost:8080";

    /// Stand-in for the origin server
    #[derive(Default)]
    struct Origin {
        responses: Mutex<HashMap<String, (StatusCode, &'static str)>>,
        offline: AtomicBool,
        calls: Mutex<Vec<(Method, String, Bytes)>>,
    }

    impl Origin {
        fn serve(&self, path: &str, status: StatusCode, body: &'static str) {
            self.responses
                .lock()
                .unwrap()
                .insert(format!("{}{}", ORIGIN, path), (status, body));
        }

        fn calls_to(&self, path: &str) -> usize {
            let url = format!("{}{}", ORIGIN, path);
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, u, _)| *u == url)
                .count()
        }
    }

    #[async_trait]
    impl Fetch for Origin {
        async fn fetch(&self, request: &FetchRequest) -> appshell_worker::Result<FetchResponse> {
            self.calls.lock().unwrap().push((
                request.method.clone(),
                request.url.to_string(),
                request.body.clone(),
            ));
            if self.offline.load(Ordering::SeqCst) {
                return Err(WorkerError::Network("connection refused".to_string()));
            }
            let canned = self
                .responses
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .copied();
            Ok(match canned {
                Some((status, body)) => FetchResponse::new(status, body),
                None => FetchResponse::new(StatusCode::NOT_FOUND, "not found"),
            })
        }
    }

    fn worker_config() -> WorkerConfig {
        WorkerConfig::new(Url::parse(ORIGIN).unwrap())
            .with_cache_names(CacheNames::for_prefix("app", Some("3")))
    }

    async fn setup(start: bool) -> (SharedState, Arc<Origin>, Arc<MemoryCacheStorage>) {
        let origin = Arc::new(Origin::default());
        origin.serve("/manifest.json", StatusCode::OK, "{}");
        origin.serve("/favicon.png", StatusCode::OK, "png");
        let cache = Arc::new(MemoryCacheStorage::new());
        let lifecycle = Arc::new(Lifecycle::new(worker_config(), cache.clone(), origin.clone()));
        if start {
            lifecycle.start().await.unwrap();
        }
        let state = Arc::new(ServerState::new(
            lifecycle,
            origin.clone(),
            &RuntimeConfig::default(),
        ));
        (state, origin, cache)
    }

    async fn send(state: &SharedState, request: axum::http::Request<Body>) -> Response {
        create_router(state.clone()).oneshot(request).await.unwrap()
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _, _) = setup(true).await;
        let response = send(&state, get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["state"], "active");
        assert_eq!(json["core_cache"], "app-v3");
        assert_eq!(json["runtime_cache"], "app-runtime-v3");
        assert_eq!(json["cache"]["stores"], 2);
    }

    #[tokio::test]
    async fn test_config_script_endpoint() {
        let (state, origin, _) = setup(true).await;
        let response = send(&state, get("/config.js")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/javascript; charset=utf-8"
        );
        assert!(body_string(response).await.starts_with("window.appConfig = "));
        assert_eq!(origin.calls_to("/config.js"), 0);
    }

    #[tokio::test]
    async fn test_get_version_message() {
        let (state, _, _) = setup(true).await;
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/__appshell/message")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"type":"GET_VERSION"}"#))
            .unwrap();

        let response = send(&state, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json, serde_json::json!({ "version": "app-v3" }));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_messages_are_accepted() {
        let (state, _, _) = setup(true).await;
        for body in [r#"{"type":"PING"}"#, "not json"] {
            let request = axum::http::Request::builder()
                .method(Method::POST)
                .uri("/__appshell/message")
                .body(Body::from(body))
                .unwrap();
            let response = send(&state, request).await;
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }
    }

    #[tokio::test]
    async fn test_skip_waiting_message_takes_control() {
        let (state, origin, _) = setup(false).await;
        state.lifecycle.install().await.unwrap();
        origin.serve("/logo.svg", StatusCode::OK, "svg");

        // Waiting worker: requests pass straight through
        let response = send(&state, get("/logo.svg")).await;
        assert!(response.headers().get("x-cache").is_none());

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/__appshell/message")
            .body(Body::from(r#"{"type":"SKIP_WAITING"}"#))
            .unwrap();
        assert_eq!(send(&state, request).await.status(), StatusCode::ACCEPTED);
        assert!(state.lifecycle.is_controlling().await);

        let response = send(&state, get("/logo.svg")).await;
        assert_eq!(response.headers()["x-cache"], "MISS");
    }

    #[tokio::test]
    async fn test_app_shell_falls_back_to_cache_when_offline() {
        let (state, origin, _) = setup(true).await;
        origin.serve("/main.dart.js", StatusCode::OK, "void main(){}");

        let response = send(&state, get("/main.dart.js")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(body_string(response).await, "void main(){}");

        // The runtime cache write is detached; wait for it to land
        let url = format!("{}/main.dart.js", ORIGIN);
        for _ in 0..100 {
            if state
                .lifecycle
                .cache()
                .match_in("app-runtime-v3", &url)
                .await
                .unwrap()
                .is_some()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        origin.offline.store(true, Ordering::SeqCst);
        let response = send(&state, get("/main.dart.js")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "HIT");
        assert_eq!(body_string(response).await, "void main(){}");
    }

    #[tokio::test]
    async fn test_offline_without_cache_is_bad_gateway() {
        let (state, origin, _) = setup(true).await;
        origin.offline.store(true, Ordering::SeqCst);

        let response = send(&state, get("/dashboard")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["error"], "Failed to fetch");
    }

    #[tokio::test]
    async fn test_static_asset_served_from_precache() {
        let (state, origin, _) = setup(true).await;
        assert_eq!(origin.calls_to("/favicon.png"), 1);

        let response = send(&state, get("/favicon.png")).await;
        assert_eq!(response.headers()["x-cache"], "HIT");
        assert_eq!(body_string(response).await, "png");
        assert_eq!(origin.calls_to("/favicon.png"), 1);
    }

    #[tokio::test]
    async fn test_api_always_hits_network() {
        let (state, origin, cache) = setup(true).await;
        let url = format!("{}/api/jobs", ORIGIN);
        cache
            .put("app-runtime-v3", &url, CachedResponse::new(200, vec![], "stale"))
            .await
            .unwrap();
        origin.serve("/api/jobs", StatusCode::OK, "fresh");

        let response = send(&state, get("/api/jobs")).await;
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(body_string(response).await, "fresh");
        assert_eq!(origin.calls_to("/api/jobs"), 1);
    }

    #[tokio::test]
    async fn test_post_passes_through_with_body() {
        let (state, origin, cache) = setup(true).await;
        origin.serve("/api/jobs", StatusCode::CREATED, "created");
        let before = cache.stats().await.entries;

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/jobs")
            .body(Body::from("payload"))
            .unwrap();
        let response = send(&state, request).await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get("x-cache").is_none());
        let calls = origin.calls.lock().unwrap().clone();
        let (method, _, body) = calls.last().unwrap();
        assert_eq!(*method, Method::POST);
        assert_eq!(body, "payload");
        assert_eq!(cache.stats().await.entries, before);
    }

    #[tokio::test]
    async fn test_foreign_absolute_target_is_rejected() {
        let (state, origin, _) = setup(true).await;
        let before = origin.calls.lock().unwrap().len();

        for target in [
            "http://cdn.example.com/flutter.js",
            "http://169.254.169.254/latest/meta-data/",
            "http://localhost:9999/main.dart.js",
        ] {
            let response = send(&state, get(target)).await;
            assert_eq!(response.status(), StatusCode::MISDIRECTED_REQUEST);
        }
        assert_eq!(origin.calls.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_absolute_target_for_origin_is_served() {
        let (state, origin, _) = setup(true).await;
        origin.serve("/main.dart.js", StatusCode::OK, "void main(){}");

        let response = send(&state, get("http://localhost:8080/main.dart.js")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
    }

    #[test]
    fn test_target_url() {
        let origin = Url::parse(ORIGIN).unwrap();

        let uri: Uri = "/main.dart.js?v=2".parse().unwrap();
        assert_eq!(
            target_url(&origin, &uri).unwrap().as_str(),
            "http://localhost:8080/main.dart.js?v=2"
        );

        let uri: Uri = "https://other.example.com/x".parse().unwrap();
        assert_eq!(
            target_url(&origin, &uri).unwrap().as_str(),
            "https://other.example.com/x"
        );
    }

    #[tokio::test]
    async fn test_passthrough_against_real_origin() {
        // Throwaway origin on an ephemeral port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/api/echo", post(|body: Bytes| async move { body }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let origin_url = Url::parse(&format!("http://{}", addr)).unwrap();
        let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new(Duration::from_secs(5)).unwrap());
        let lifecycle = Arc::new(Lifecycle::new(
            WorkerConfig::new(origin_url).with_critical_resources(Vec::<String>::new()),
            Arc::new(MemoryCacheStorage::new()),
            fetcher.clone(),
        ));
        lifecycle.start().await.unwrap();
        let state = Arc::new(ServerState::new(lifecycle, fetcher, &RuntimeConfig::default()));

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/echo")
            .body(Body::from("hello origin"))
            .unwrap();
        let response = send(&state, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "hello origin");
    }
}

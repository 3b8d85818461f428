//! HTTP server wiring.

use std::net::SocketAddr;

use axum::body::Body;
use axum::routing::get;
use axum::{middleware, Extension, Json, Router};
use http::Request;
use serde_json::{json, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::{error, info, info_span, Level, Span};

use super::layer::AdmissionLayer;
use super::recovery::internal_error;
use super::request_id::{request_id, RequestId};
use crate::error::{GatekeeperError, Result};
use crate::ratelimit::ClientKey;

/// Liveness probe, exempt from admission control.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Echo the caller's client key and correlation id.
async fn whoami(
    Extension(client): Extension<ClientKey>,
    Extension(request_id): Extension<RequestId>,
) -> Json<Value> {
    Json(json!({
        "client": client.to_string(),
        "request_id": request_id.0,
    }))
}

fn access_span(req: &Request<Body>) -> Span {
    let rid = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.as_str())
        .unwrap_or_default();

    info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        rid = %rid,
    )
}

/// Build the application router.
///
/// Everything under `/api` passes admission control; `/health` does not.
pub fn build_router(admission: AdmissionLayer) -> Router {
    let api = Router::new()
        .route("/v1/whoami", get(whoami))
        .layer(admission);

    with_middleware(Router::new().route("/health", get(health)).nest("/api", api))
}

/// Wrap `router` in the shared middleware stack, outermost first:
/// request id, access log, panic recovery.
///
/// The request id is outermost so that rejections, panics and access log
/// lines all carry it.
pub fn with_middleware(router: Router) -> Router {
    let access_log = TraceLayer::new_for_http()
        .make_span_with(access_span)
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    router
        .layer(CatchPanicLayer::custom(internal_error))
        .layer(access_log)
        .layer(middleware::from_fn(request_id))
}

/// HTTP server for the admission-controlled API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The application router
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GatekeeperError::Server(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionDecisionPoint;
    use crate::http::client::ClientKeyExtractor;
    use crate::http::rejection::ErrorBody;
    use crate::http::request_id::REQUEST_ID_HEADER;
    use crate::ratelimit::{LocalRateLimiter, TierLimits};
    use http::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(client_limit: u64) -> Router {
        let limiter = LocalRateLimiter::new(TierLimits {
            global_limit: 100,
            client_limit,
            window: Duration::from_secs(60),
        });
        let point = AdmissionDecisionPoint::new(Arc::new(limiter));
        // Tests have no peer address; trust the forwarded header instead.
        build_router(AdmissionLayer::new(point, ClientKeyExtractor::new(true, false)))
    }

    fn get_from(uri: &str, ip: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_id_is_generated_and_echoed() {
        let response = router(5).oneshot(get_from("/api/v1/whoami", "192.0.2.8")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let rid = response.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["client"], "ip:192.0.2.8");
        assert_eq!(body["request_id"], rid);
    }

    #[tokio::test]
    async fn test_rejection_carries_caller_request_id() {
        let app = router(1);

        app.clone().oneshot(get_from("/api/v1/whoami", "192.0.2.8")).await.unwrap();

        let mut req = get_from("/api/v1/whoami", "192.0.2.8");
        req.headers_mut().insert(REQUEST_ID_HEADER, "trace-7".parse().unwrap());
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "trace-7");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["request_id"], "trace-7");
    }

    #[tokio::test]
    async fn test_health_is_not_rate_limited() {
        let app = router(1);

        for _ in 0..3 {
            let response = app.clone().oneshot(get_from("/health", "192.0.2.8")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    async fn explode() -> &'static str {
        panic!("handler failed")
    }

    #[tokio::test]
    async fn test_panicking_handler_returns_500_with_request_id() {
        let app = with_middleware(Router::new().route("/explode", get(explode)));

        let req = Request::builder()
            .uri("/explode")
            .header(REQUEST_ID_HEADER, "rid-panic")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "rid-panic");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert_eq!(body.message, "internal server error");
        assert_eq!(body.request_id, "rid-panic");
    }

    #[tokio::test]
    async fn test_server_keeps_serving_after_a_panic() {
        let app = with_middleware(
            Router::new()
                .route("/explode", get(explode))
                .route("/ok", get(|| async { "ok" })),
        );

        let req = Request::builder().uri("/explode").body(Body::empty()).unwrap();
        let first = app.clone().oneshot(req).await.unwrap();
        assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let req = Request::builder().uri("/ok").body(Body::empty()).unwrap();
        let second = app.oneshot(req).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
    }
}

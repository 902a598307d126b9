//! HTTP/JSON-RPC bridge transport.
//!
//! # Responsibilities
//! - Create Axum Router with the RPC, health and status routes
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Optional bearer API key and per-IP rate limiting
//! - Bind the listener and serve until the context is cancelled

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::HttpConfig;
use crate::http::auth::{api_key_middleware, ApiKey};
use crate::http::handlers::{health_handler, rpc_handler, status_handler, HttpState};
use crate::http::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::lifecycle::Coordinator;
use crate::transport::{HandlerTarget, TransportBinding, TransportError};

/// HTTP transport binding.
pub struct HttpTransport {
    config: HttpConfig,
    coordinator: Option<Weak<Coordinator>>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            coordinator: None,
        }
    }

    /// Report this coordinator's subsystems on `/health` and `/status`.
    pub fn with_status(mut self, coordinator: &Arc<Coordinator>) -> Self {
        self.coordinator = Some(Arc::downgrade(coordinator));
        self
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self, target: HandlerTarget) -> Router {
        let state = HttpState {
            target,
            coordinator: self.coordinator.clone(),
            permits: Arc::new(Semaphore::new(
                self.config.max_concurrent_requests.min(Semaphore::MAX_PERMITS),
            )),
        };

        let mut protected = Router::new()
            .route("/rpc", post(rpc_handler))
            .route("/status", get(status_handler));
        if let Some(key) = self.config.api_key.as_deref() {
            protected = protected.route_layer(middleware::from_fn_with_state(ApiKey::new(key), api_key_middleware));
        }

        let mut router = protected.route("/health", get(health_handler)).with_state(state);

        if self.config.rate_limit.enabled {
            let limiter = Arc::new(RateLimiter::new(&self.config.rate_limit));
            router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }

        router.layer(DefaultBodyLimit::disable()).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(RequestBodyLimitLayer::new(self.config.max_body_size))
                .layer(TimeoutLayer::new(Duration::from_secs(self.config.request_timeout_secs))),
        )
    }

    /// Serve on an already-bound listener until `ctx` is cancelled.
    pub async fn serve_listener(
        &self,
        listener: TcpListener,
        ctx: CancellationToken,
        target: HandlerTarget,
    ) -> Result<(), TransportError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            auth = self.config.api_key.is_some(),
            rate_limit = self.config.rate_limit.enabled,
            "HTTP transport listening"
        );

        let app = self.router(target).into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { ctx.cancelled().await })
            .await?;

        tracing::info!("HTTP transport stopped");
        Ok(())
    }
}

#[async_trait]
impl TransportBinding for HttpTransport {
    async fn serve(&self, ctx: CancellationToken, target: HandlerTarget) -> Result<(), TransportError> {
        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|source| TransportError::Bind {
                address: self.config.bind_address.clone(),
                source,
            })?;
        self.serve_listener(listener, ctx, target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::transport::RequestHandler;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, request: &str) -> Option<String> {
            (!request.contains("notify")).then(|| request.to_string())
        }
    }

    fn rpc(body: &str) -> Request<Body> {
        Request::post("/rpc").body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn rpc_round_trip_and_request_id() {
        let app = HttpTransport::new(HttpConfig::default()).router(Arc::new(Echo));
        let response = app.oneshot(rpc("{\"ping\":1}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"{\"ping\":1}");
    }

    #[tokio::test]
    async fn notification_gets_no_content() {
        let app = HttpTransport::new(HttpConfig::default()).router(Arc::new(Echo));
        let response = app.oneshot(rpc("notify")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn api_key_guards_rpc_but_not_health() {
        let config = HttpConfig {
            api_key: Some("k".into()),
            ..HttpConfig::default()
        };
        let app = HttpTransport::new(config).router(Arc::new(Echo));

        let denied = app.clone().oneshot(rpc("{}")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = app
            .clone()
            .oneshot(
                Request::post("/rpc")
                    .header("authorization", "Bearer k")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);

        let health = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversized_body_rejected() {
        let config = HttpConfig {
            max_body_size: 16,
            ..HttpConfig::default()
        };
        let app = HttpTransport::new(config).router(Arc::new(Echo));
        let response = app.oneshot(rpc(&"x".repeat(64))).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn rate_limit_returns_429() {
        let config = HttpConfig {
            rate_limit: RateLimitConfig {
                enabled: true,
                requests_per_second: 1,
                burst_size: 1,
            },
            ..HttpConfig::default()
        };
        let app = HttpTransport::new(config).router(Arc::new(Echo));

        let first = app.clone().oneshot(rpc("{}")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.oneshot(rpc("{}")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn requests_over_concurrency_cap_are_shed() {
        let config = HttpConfig {
            max_concurrent_requests: 0,
            ..HttpConfig::default()
        };
        let app = HttpTransport::new(config).router(Arc::new(Echo));
        let response = app.oneshot(rpc("{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn oversized_concurrency_cap_is_clamped() {
        let config = HttpConfig {
            max_concurrent_requests: usize::MAX,
            ..HttpConfig::default()
        };
        let app = HttpTransport::new(config).router(Arc::new(Echo));
        let response = app.oneshot(rpc("{}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_degrades_until_subsystems_run() {
        let mut coordinator = Coordinator::new();
        coordinator.register(crate::lifecycle::Supervisor::new("sessions"));
        let coordinator = Arc::new(coordinator);
        coordinator.initialize_all().unwrap();

        let app = HttpTransport::new(HttpConfig::default())
            .with_status(&coordinator)
            .router(Arc::new(Echo));
        let health = || Request::get("/health").body(Body::empty()).unwrap();

        let degraded = app.clone().oneshot(health()).await.unwrap();
        assert_eq!(degraded.status(), StatusCode::SERVICE_UNAVAILABLE);

        coordinator.start_all(CancellationToken::new()).await.unwrap();
        let healthy = app.clone().oneshot(health()).await.unwrap();
        assert_eq!(healthy.status(), StatusCode::OK);

        let status = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(status.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["subsystems"][0]["name"], "sessions");
        assert_eq!(json["subsystems"][0]["state"], "running");
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = HttpConfig {
            bind_address: taken.local_addr().unwrap().to_string(),
            ..HttpConfig::default()
        };
        let err = HttpTransport::new(config)
            .serve(CancellationToken::new(), Arc::new(Echo))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}

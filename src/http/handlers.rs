//! Route handlers for the HTTP bridge.

use std::sync::{Arc, Weak};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tokio::sync::Semaphore;

use crate::lifecycle::Coordinator;
use crate::transport::HandlerTarget;

/// State shared by every route.
#[derive(Clone)]
pub struct HttpState {
    pub target: HandlerTarget,
    /// The coordinator indirectly owns this transport, so hold it weakly.
    pub coordinator: Option<Weak<Coordinator>>,
    pub permits: Arc<Semaphore>,
}

impl HttpState {
    fn coordinator(&self) -> Option<Arc<Coordinator>> {
        self.coordinator.as_ref().and_then(Weak::upgrade)
    }
}

/// `POST /rpc`: forward the body to the target.
pub async fn rpc_handler(State(state): State<HttpState>, body: String) -> Response {
    let Ok(_permit) = state.permits.clone().try_acquire_owned() else {
        tracing::warn!("Concurrent request limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many concurrent requests").into_response();
    };

    match state.target.handle(&body).await {
        Some(reply) => ([(header::CONTENT_TYPE, "application/json")], reply).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// `GET /health`: 200 while every subsystem runs, 503 otherwise.
pub async fn health_handler(State(state): State<HttpState>) -> Response {
    let healthy = state.coordinator().map_or(true, |c| c.is_healthy());
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({ "status": if healthy { "healthy" } else { "degraded" } });
    (status, Json(body)).into_response()
}

/// `GET /status`: per-subsystem lifecycle status.
pub async fn status_handler(State(state): State<HttpState>) -> Response {
    match state.coordinator() {
        Some(coordinator) => Json(json!({
            "healthy": coordinator.is_healthy(),
            "subsystems": coordinator.status(),
        }))
        .into_response(),
        None => Json(json!({ "healthy": true, "subsystems": [] })).into_response(),
    }
}

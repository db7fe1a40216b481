//! HTTP surface: the upgrade endpoint and `/health`.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ApiError;
use crate::hub::Hub;
use crate::session::SessionState;

/// Health check response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server runs.
    pub status: String,
    pub active_sessions: usize,
    /// Registered cortices, bound once per session.
    pub cortices: usize,
    pub uptime_secs: u64,
}

impl HealthResponse {
    pub fn from_hub(hub: &Hub) -> Self {
        Self {
            status: "ok".into(),
            active_sessions: hub.active_sessions(),
            cortices: hub.cortex_count(),
            uptime_secs: hub.uptime().as_secs(),
        }
    }
}

/// Router with the hub mounted on `ws_path` plus `GET /health`.
pub fn build_router(hub: Hub, ws_path: &str) -> Router {
    Router::new()
        .route(ws_path, get(upgrade))
        .route("/health", get(health))
        .with_state(hub)
}

/// `GET <ws_path>`: upgrade and serve one session.
async fn upgrade(
    State(hub): State<Hub>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let lifecycle = Arc::new(hub.open_lifecycle());
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            lifecycle.advance(SessionState::Closed);
            warn!(status = %rejection.status(), "WebSocket upgrade rejected");
            return ApiError::new(rejection.status(), rejection.body_text()).into_response();
        }
    };
    let failed = Arc::clone(&lifecycle);
    ws.on_failed_upgrade(move |e| {
        warn!(error = %e, "WebSocket upgrade failed");
        failed.advance(SessionState::Closed);
    })
    .on_upgrade(move |socket| async move {
        hub.serve_with(socket, &lifecycle).await;
    })
}

/// `GET /health`
async fn health(State(hub): State<Hub>) -> Json<HealthResponse> {
    Json(HealthResponse::from_hub(&hub))
}

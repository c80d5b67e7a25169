//! Route definitions for the bridge.

use axum::{
    response::Html,
    routing::{get, post},
    Router,
};

use super::api;
use super::Bridge;

/// Create the full app router.
pub fn create_app_router(bridge: Bridge) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(api::viewer_socket))
        .route("/send", post(api::send_message))
        .route("/api/stats", get(api::bridge_stats))
        .route("/health", get(health_check))
        .with_state(bridge)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

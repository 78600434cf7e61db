use crate::handlers::{diagnostics, health_check, ready_check};
use crate::ws::presence_gateway::presence_handler;
use crate::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health_check))
        .route("/v1/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/presence", get(presence_handler))
        .with_state(state)
}

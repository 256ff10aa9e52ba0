use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, ws};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route(
            "/tokens",
            get(handlers::list_tokens).post(handlers::issue_token),
        )
        .route("/tokens/:id", get(handlers::get_token))
        .route("/tokens/:id/cancel", post(handlers::cancel_token))
        .route("/tokens/:id/complete", post(handlers::complete_token))
        .route("/tokens/:id/position", get(handlers::get_position))
        .route("/tokens/:id/presence", post(handlers::report_presence))
        .route("/tokens/:id/serve", post(handlers::serve_token))
        .route("/services/:id/call-next", post(handlers::call_next))
        .route("/ws/services/:id", get(ws::service_socket))
        .route("/ws/tokens/:id", get(ws::token_socket))
        .route("/_internal/health", get(handlers::health));

    // Test-only routes -- dangerous operations gated behind TEST_MODE
    if state.config.test_mode {
        tracing::warn!("Test mode enabled — purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub node_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub presence_checks_deleted: u64,
    pub services_deleted: u64,
    pub tokens_deleted: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn health(State(state): State<Arc<AppState>>) -> Json<JSend<HealthResponse>> {
    JSend::success(HealthResponse {
        node_id: state.config.node.id.clone(),
        status: "healthy".to_string(),
    })
}

pub async fn admin_purge(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<PurgeResponse>>, ApiError> {
    match state.db.purge_all() {
        Ok(stats) => {
            tracing::warn!(
                tokens = stats.tokens,
                services = stats.services,
                "Purged all data"
            );
            Ok(JSend::success(PurgeResponse {
                presence_checks_deleted: stats.presence_checks,
                services_deleted: stats.services,
                tokens_deleted: stats.tokens,
            }))
        }
        Err(e) => Err(ApiError::internal(format!("Failed to purge data: {e}"))),
    }
}

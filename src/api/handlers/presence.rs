use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::presence::{self, PresenceVerdict};
use crate::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct ReportPresenceRequest {
    #[serde(default)]
    pub accuracy_m: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
}

pub async fn report_presence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(req): AppJson<ReportPresenceRequest>,
) -> Result<Json<JSend<PresenceVerdict>>, ApiError> {
    if !(-90.0..=90.0).contains(&req.latitude) {
        return Err(ApiError::bad_request("latitude must be within -90..90"));
    }
    if !(-180.0..=180.0).contains(&req.longitude) {
        return Err(ApiError::bad_request("longitude must be within -180..180"));
    }

    let verdict = presence::check_presence(
        &state.db,
        state.clock.as_ref(),
        &id,
        req.latitude,
        req.longitude,
        req.accuracy_m,
    )?;

    tracing::debug!(
        token_id = %id,
        within = verdict.is_within_geofence,
        "Recorded presence check"
    );

    Ok(JSend::success(verdict))
}

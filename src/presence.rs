//! Presence compliance: verify a reported location against the service's
//! geofence and record the check.
//!
//! Checks never change token status — acting on an out-of-range token is
//! the auto-no-show sweep's job.

use serde::Serialize;
use tracing::debug;

use crate::clock::Clock;
use crate::geo::haversine_distance;
use crate::queue::QueueError;
use crate::storage::models::{CheckType, Coordinates, PresenceCheck, TokenStatus};
use crate::storage::Database;

/// Outcome of one presence check.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceVerdict {
    pub distance_m: f64,
    pub is_within_geofence: bool,
    pub required_radius_m: f64,
}

/// Compute the distance to the token's service site, record an immutable
/// `PresenceCheck` and return the verdict.
pub fn check_presence(
    db: &Database,
    clock: &dyn Clock,
    token_id: &str,
    latitude: f64,
    longitude: f64,
    accuracy_m: Option<f64>,
) -> Result<PresenceVerdict, QueueError> {
    let token = db.get_token(token_id)?.ok_or(QueueError::TokenNotFound)?;
    let service = db
        .get_service(&token.service_id)?
        .ok_or(QueueError::ServiceUnavailable)?;

    let reported = Coordinates {
        latitude,
        longitude,
    };
    let distance_m = haversine_distance(reported, service.site);
    let is_within_geofence = distance_m <= service.geofence_radius_m;

    let check = PresenceCheck {
        accuracy_m,
        check_type: if token.status == TokenStatus::Called {
            CheckType::AtTurn
        } else {
            CheckType::Scheduled
        },
        checked_at: clock.now(),
        distance_m,
        is_within_geofence,
        reported,
    };
    db.append_presence_check(token_id, &check)?;

    debug!(
        token_id = %token_id,
        distance_m = distance_m,
        within = is_within_geofence,
        check_type = ?check.check_type,
        "Recorded presence check"
    );

    Ok(PresenceVerdict {
        distance_m,
        is_within_geofence,
        required_radius_m: service.geofence_radius_m,
    })
}

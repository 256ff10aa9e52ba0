use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A geographic point (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A service counter that tokens queue against.
///
/// Created and edited by the external admin surface; the queue core treats
/// services as read-only except for the lifetime `tokens_issued` counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Whether the service is currently accepting tokens
    pub active: bool,
    /// When the service was created
    pub created_at: DateTime<Utc>,
    /// Average per-ticket service duration in minutes (must be > 0)
    pub estimated_service_minutes: u32,
    /// Geofence radius around the site, in meters
    pub geofence_radius_m: f64,
    pub id: String,
    /// Maximum tokens in ACTIVE/CALLED at once
    pub max_concurrent_tokens: u32,
    /// Maximum tokens issuable per day
    pub max_tokens_per_day: u32,
    /// Human-readable name (also seeds the ticket-number prefix)
    pub name: String,
    /// Registered geographic site of the counter
    pub site: Coordinates,
    /// Lifetime count of tokens ever issued for this service
    pub tokens_issued: u64,
}

/// Token lifecycle states.
///
/// `Active -> Called -> InService -> Completed` is the happy path;
/// `Cancelled`, `NoShow` and `Expired` are the other terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Active,
    Called,
    InService,
    Completed,
    Cancelled,
    NoShow,
    Expired,
}

impl TokenStatus {
    /// Whether the token occupies a queue position (the set the contiguity
    /// invariant ranges over).
    pub fn is_queued(self) -> bool {
        matches!(self, TokenStatus::Active | TokenStatus::Called)
    }

    /// Whether the token has reached a state no transition leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TokenStatus::Completed
                | TokenStatus::Cancelled
                | TokenStatus::NoShow
                | TokenStatus::Expired
        )
    }
}

/// One queue ticket.
///
/// Tokens are never deleted; terminal states are retained for history and
/// for the time-windowed limit queries (daily issuance, no-show suspension,
/// cancellation abuse).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Set when the system (a sweep) cancelled/expired the token
    pub auto_cancelled: bool,
    pub called_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    /// Stamp for Cancelled, NoShow and Expired alike
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Persisted snapshot of the derived wait estimate (minutes). The
    /// authoritative value is always `(position - 1) * estimated_service_minutes`.
    pub estimated_wait_minutes: u32,
    pub id: String,
    pub queue_position: u32,
    pub service_id: String,
    pub service_started_at: Option<DateTime<Utc>>,
    pub status: TokenStatus,
    /// Human-readable ticket number, e.g. `CLI-260828-003`
    pub ticket_number: String,
    pub user_id: String,
}

impl Token {
    /// Derived wait estimate for the token's current position.
    pub fn estimated_wait(&self, service: &Service) -> u32 {
        self.queue_position.saturating_sub(1) * service.estimated_service_minutes
    }
}

/// Why a presence check was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckType {
    /// Routine check while waiting in the queue
    Scheduled,
    /// Check performed while the token is CALLED
    AtTurn,
}

/// An immutable record of one location verification for a token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceCheck {
    /// Reported GPS accuracy in meters, if the client provided one
    pub accuracy_m: Option<f64>,
    pub check_type: CheckType,
    pub checked_at: DateTime<Utc>,
    /// Great-circle distance from the service site, in meters
    pub distance_m: f64,
    pub is_within_geofence: bool,
    pub reported: Coordinates,
}

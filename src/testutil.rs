//! Shared test helpers — available to all `#[cfg(test)]` modules in the crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::cache::QueueCache;
use crate::clock::Clock;
use crate::collab::{AbuseSink, Notifier};
use crate::config::{CacheConfig, Config, NodeConfig, QueueConfig, SweepConfig};
use crate::realtime::RealtimeHub;
use crate::storage::models::{Coordinates, Service, Token, TokenStatus};
use crate::storage::Database;
use crate::AppState;

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard — the caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// A minimal `Config` suitable for unit tests.
pub fn test_config() -> Config {
    Config {
        cache: CacheConfig::default(),
        node: NodeConfig {
            bind_address: "127.0.0.1:8080".to_string(),
            data_dir: "/tmp/test".to_string(),
            id: "test-node".to_string(),
        },
        queue: QueueConfig::default(),
        sweeps: SweepConfig::default(),
        test_mode: false,
    }
}

/// Default queue limits (daily limit 3, grace 120s, thresholds 3/5).
pub fn test_queue_config() -> QueueConfig {
    QueueConfig::default()
}

/// A ready-to-issue service: active, 10-minute service time, 100m geofence
/// at (52.52, 13.405).
pub fn make_service(id: &str) -> Service {
    Service {
        active: true,
        created_at: Utc::now(),
        estimated_service_minutes: 10,
        geofence_radius_m: 100.0,
        id: id.to_string(),
        max_concurrent_tokens: 50,
        max_tokens_per_day: 200,
        name: "Test Counter".to_string(),
        site: Coordinates {
            latitude: 52.52,
            longitude: 13.405,
        },
        tokens_issued: 0,
    }
}

/// Store [`make_service`] in the database and return it.
pub fn seed_service(db: &Database, id: &str) -> Service {
    let service = make_service(id);
    db.put_service(&service).unwrap();
    service
}

/// Build a `Token` struct without touching a database (for cache/event
/// tests; lifecycle tests should go through `issue`).
pub fn make_token(
    id: &str,
    user_id: &str,
    service_id: &str,
    position: u32,
    status: TokenStatus,
) -> Token {
    Token {
        auto_cancelled: false,
        called_at: None,
        cancel_reason: None,
        cancelled_at: None,
        completed_at: None,
        created_at: Utc::now(),
        estimated_wait_minutes: position.saturating_sub(1) * 10,
        id: id.to_string(),
        queue_position: position,
        service_id: service_id.to_string(),
        service_started_at: None,
        status,
        ticket_number: format!("TST-260828-{position:03}"),
        user_id: user_id.to_string(),
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Abuse sink that records `(user_id, event_type, severity, description)`.
#[derive(Default)]
pub struct RecordingAbuseSink {
    pub reports: Mutex<Vec<(String, String, u8, String)>>,
}

impl AbuseSink for RecordingAbuseSink {
    fn report(&self, user_id: &str, event_type: &str, severity: u8, description: &str) {
        self.reports.lock().unwrap().push((
            user_id.to_string(),
            event_type.to_string(),
            severity,
            description.to_string(),
        ));
    }
}

/// Notifier that records `(user_id, kind)`.
#[derive(Default)]
pub struct RecordingNotifier {
    pub notifications: Mutex<Vec<(String, String)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, user_id: &str, kind: &str, _title: &str, _message: &str) {
        self.notifications
            .lock()
            .unwrap()
            .push((user_id.to_string(), kind.to_string()));
    }
}

/// A full `AppState` with recording collaborator stubs.
pub struct TestHarness {
    pub abuse: Arc<RecordingAbuseSink>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: Arc<AppState>,
    _temp: TempDir,
}

/// Build a full `Arc<AppState>` around a fresh database and the given clock.
pub fn test_harness(clock: Arc<dyn Clock>) -> TestHarness {
    let (db, temp) = setup_db();
    let config = test_config();
    let abuse = Arc::new(RecordingAbuseSink::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let state = Arc::new(AppState {
        abuse: Arc::clone(&abuse) as Arc<dyn AbuseSink>,
        cache: QueueCache::new(
            Duration::from_secs(config.cache.listing_ttl_seconds),
            Duration::from_secs(config.cache.token_ttl_seconds),
        ),
        clock,
        config,
        db,
        notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
        realtime: Arc::new(RealtimeHub::new("test-node")),
    });

    TestHarness {
        abuse,
        notifier,
        state,
        _temp: temp,
    }
}

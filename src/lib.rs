//! queue-manager - A queue token issuance and lifecycle management service
//!
//! This crate issues numbered queue tickets ("tokens") against service
//! counters and advances them through a bounded state machine:
//! - Monotonic, contiguous queue positions per service
//! - Geofence presence compliance checks
//! - Background sweeps for no-shows, wait estimates and end-of-day expiry
//! - Realtime fan-out of lifecycle events over WebSocket, bridged across
//!   instances
//! - redb embedded database (ACID, MVCC, crash-safe)
//! - REST API

pub mod api;
pub mod cache;
pub mod clock;
pub mod collab;
pub mod config;
pub mod fanout;
pub mod geo;
pub mod presence;
pub mod queue;
pub mod realtime;
pub mod storage;
pub mod sweeps;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use cache::QueueCache;
use clock::Clock;
use collab::{AbuseSink, Notifier};
use config::Config;
use realtime::RealtimeHub;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub abuse: Arc<dyn AbuseSink>,
    pub cache: QueueCache,
    pub clock: Arc<dyn Clock>,
    pub config: Config,
    pub db: Database,
    pub notifier: Arc<dyn Notifier>,
    pub realtime: Arc<RealtimeHub>,
}

//! Realtime fan-out of queue and token lifecycle events.
//!
//! Each server instance keeps per-service and per-token broadcast channels
//! for its own live subscribers, and mirrors every published event onto an
//! optional cross-instance [`Bridge`] so sibling instances can rebroadcast
//! to their local connections. Delivery is fire-and-forget: a lost event is
//! acceptable because clients can always re-fetch authoritative position
//! state. Events for one token are delivered in publish order per channel;
//! no ordering is guaranteed across tokens.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::models::{Service, Token, TokenStatus};

const CHANNEL_CAPACITY: usize = 64;

/// Wire-ready view of a token carried in event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub estimated_wait_minutes: u32,
    pub id: String,
    pub queue_position: u32,
    pub status: TokenStatus,
    pub ticket_number: String,
}

impl TokenSnapshot {
    pub fn from_token(token: &Token, service: &Service) -> Self {
        Self {
            estimated_wait_minutes: token.estimated_wait(service),
            id: token.id.clone(),
            queue_position: token.queue_position,
            status: token.status,
            ticket_number: token.ticket_number.clone(),
        }
    }
}

/// Closed union of realtime event kinds with fixed payload shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum QueueEvent {
    #[serde(rename = "presence:check_required")]
    PresenceCheckRequired { token_id: String },
    #[serde(rename = "queue:update")]
    QueueUpdate {
        service_id: String,
        tokens: Vec<TokenSnapshot>,
    },
    #[serde(rename = "token:cancelled")]
    TokenCancelled {
        reason: Option<String>,
        token_id: String,
    },
    #[serde(rename = "token:update")]
    TokenUpdate {
        position: Option<u32>,
        token: TokenSnapshot,
    },
    #[serde(rename = "token:your_turn")]
    YourTurn {
        ticket_number: String,
        token_id: String,
    },
}

/// Which connection group an event targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventScope {
    Service(String),
    Token(String),
}

/// An event traveling over the cross-instance channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgedEvent {
    pub event: QueueEvent,
    /// Publishing instance, so subscribers can skip their own events
    pub origin: String,
    pub scope: EventScope,
}

/// Shared publish/subscribe channel between service instances.
///
/// Each instance is a pure subscriber/republisher: inbound sibling events
/// are rebroadcast locally only and never re-bridged.
pub trait Bridge: Send + Sync {
    fn publish(&self, event: BridgedEvent);
    fn subscribe(&self) -> broadcast::Receiver<BridgedEvent>;
}

/// In-process bridge; stands in for a shared channel when all instances
/// live in one process (tests, single-node deployments that opt in).
pub struct LoopbackBridge {
    tx: broadcast::Sender<BridgedEvent>,
}

impl LoopbackBridge {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl Default for LoopbackBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge for LoopbackBridge {
    fn publish(&self, event: BridgedEvent) {
        let _ = self.tx.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<BridgedEvent> {
        self.tx.subscribe()
    }
}

/// Connection groups keyed by service and by token.
pub struct RealtimeHub {
    bridge: Option<Arc<dyn Bridge>>,
    /// Identifies this instance on the bridge
    origin: String,
    services: RwLock<HashMap<String, broadcast::Sender<QueueEvent>>>,
    tokens: RwLock<HashMap<String, broadcast::Sender<QueueEvent>>>,
}

impl RealtimeHub {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            bridge: None,
            origin: origin.into(),
            services: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_bridge(origin: impl Into<String>, bridge: Arc<dyn Bridge>) -> Self {
        Self {
            bridge: Some(bridge),
            origin: origin.into(),
            services: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to events scoped to one service.
    pub fn subscribe_service(&self, service_id: &str) -> broadcast::Receiver<QueueEvent> {
        subscribe(&self.services, service_id)
    }

    /// Subscribe to events scoped to one token.
    pub fn subscribe_token(&self, token_id: &str) -> broadcast::Receiver<QueueEvent> {
        subscribe(&self.tokens, token_id)
    }

    /// Broadcast to local subscribers and mirror onto the bridge.
    pub fn publish(&self, scope: EventScope, event: QueueEvent) {
        self.publish_local(&scope, event.clone());
        if let Some(bridge) = &self.bridge {
            bridge.publish(BridgedEvent {
                event,
                origin: self.origin.clone(),
                scope,
            });
        }
    }

    /// Broadcast to local subscribers only (used for inbound bridge events).
    fn publish_local(&self, scope: &EventScope, event: QueueEvent) {
        match scope {
            EventScope::Service(id) => send(&self.services, id, event),
            EventScope::Token(id) => send(&self.tokens, id, event),
        }
    }

    fn bridge_receiver(&self) -> Option<broadcast::Receiver<BridgedEvent>> {
        self.bridge.as_ref().map(|b| b.subscribe())
    }

    /// Rebroadcast sibling instances' events to local subscribers.
    ///
    /// Returns `None` when no bridge is configured.
    pub fn start_bridge_listener(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self.bridge_receiver()?;
        let hub = Arc::clone(self);

        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(bridged) => {
                        if bridged.origin == hub.origin {
                            continue;
                        }
                        hub.publish_local(&bridged.scope, bridged.event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Bridge listener lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Bridge channel closed; stopping listener");
                        break;
                    }
                }
            }
        }))
    }
}

fn subscribe(
    map: &RwLock<HashMap<String, broadcast::Sender<QueueEvent>>>,
    key: &str,
) -> broadcast::Receiver<QueueEvent> {
    let mut map = map.write().unwrap_or_else(|e| e.into_inner());
    map.entry(key.to_string())
        .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
        .subscribe()
}

fn send(
    map: &RwLock<HashMap<String, broadcast::Sender<QueueEvent>>>,
    key: &str,
    event: QueueEvent,
) {
    let mut map = map.write().unwrap_or_else(|e| e.into_inner());
    if let Some(tx) = map.get(key) {
        if tx.send(event).is_err() {
            // Last receiver went away; drop the dead channel
            map.remove(key);
        }
    }
}

//! Post-mutation plumbing shared by the API handlers and the sweeps:
//! invalidate the touched cache keys, then broadcast the change.
//!
//! Everything here is best-effort. A failure to assemble or deliver a
//! broadcast is logged and swallowed — the datastore write has already
//! committed and clients can always re-fetch authoritative state.

use tracing::warn;

use crate::queue::ledger;
use crate::queue::lifecycle::{self, ListGroup};
use crate::realtime::{EventScope, QueueEvent, TokenSnapshot};
use crate::storage::models::Token;
use crate::AppState;

/// The active queue of a service changed shape: drop its cached listings
/// and broadcast a fresh snapshot to service-scope subscribers.
pub fn queue_changed(state: &AppState, service_id: &str) {
    state.cache.invalidate_service(service_id);

    let service = match state.db.get_service(service_id) {
        Ok(Some(service)) => service,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, service_id = %service_id, "Skipping queue broadcast");
            return;
        }
    };

    let tokens = match lifecycle::list(&state.db, Some(service_id), ListGroup::Active) {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(error = %e, service_id = %service_id, "Skipping queue broadcast");
            return;
        }
    };

    let snapshots: Vec<TokenSnapshot> = tokens
        .iter()
        .map(|t| TokenSnapshot::from_token(t, &service))
        .collect();

    state.realtime.publish(
        EventScope::Service(service_id.to_string()),
        QueueEvent::QueueUpdate {
            service_id: service_id.to_string(),
            tokens: snapshots,
        },
    );
}

/// One token changed: drop its cached snapshot and broadcast the new state
/// (with its current position) to token-scope subscribers.
pub fn token_changed(state: &AppState, token: &Token) {
    state.cache.invalidate_token(&token.id);

    let service = match state.db.get_service(&token.service_id) {
        Ok(Some(service)) => service,
        _ => return,
    };
    let position = ledger::position_of(&state.db, &token.id)
        .ok()
        .and_then(|p| p.position);

    state.realtime.publish(
        EventScope::Token(token.id.clone()),
        QueueEvent::TokenUpdate {
            position,
            token: TokenSnapshot::from_token(token, &service),
        },
    );
}

//! Scheduled background sweeps.
//!
//! Four independent interval tasks: presence nudges for tokens nearing
//! their turn, auto-no-show of stale CALLED tokens, wait-estimate refresh,
//! and end-of-day expiry. Each sweep is idempotent and safe to re-run
//! (at-least-once); a failure for one token or service is logged and never
//! aborts the rest of the pass. Sweeps read current status immediately
//! before acting and treat an already-transitioned token as a no-op.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::fanout;
use crate::queue::lifecycle;
use crate::queue::QueueError;
use crate::realtime::{EventScope, QueueEvent};
use crate::storage::models::TokenStatus;
use crate::AppState;

/// Tokens nudged per service per pass
const NUDGE_BATCH: usize = 5;

/// Start all four sweep tasks.
pub fn start_sweeps(state: Arc<AppState>) -> Vec<JoinHandle<()>> {
    let sweeps = &state.config.sweeps;
    vec![
        spawn_sweep(
            Arc::clone(&state),
            sweeps.presence_nudge_interval_seconds,
            "presence-nudge",
            run_presence_nudge,
        ),
        spawn_sweep(
            Arc::clone(&state),
            sweeps.no_show_interval_seconds,
            "auto-no-show",
            run_no_show_sweep,
        ),
        spawn_sweep(
            Arc::clone(&state),
            sweeps.wait_refresh_interval_seconds,
            "wait-refresh",
            run_wait_refresh,
        ),
        spawn_sweep(
            Arc::clone(&state),
            sweeps.end_of_day_interval_seconds,
            "end-of-day",
            run_end_of_day,
        ),
    ]
}

fn spawn_sweep(
    state: Arc<AppState>,
    interval_seconds: u64,
    name: &'static str,
    run: fn(&AppState),
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(Duration::from_secs(interval_seconds));

        loop {
            interval_timer.tick().await;
            debug!(sweep = name, "Running sweep");

            let state = Arc::clone(&state);
            let result = tokio::task::spawn_blocking(move || run(&state)).await;
            if let Err(e) = result {
                error!(sweep = name, error = %e, "Sweep task panicked");
            }
        }
    })
}

/// Ask the tokens nearest the front of each queue to confirm presence.
/// Never mutates state.
pub fn run_presence_nudge(state: &AppState) {
    let services = match state.db.get_all_services() {
        Ok(services) => services,
        Err(e) => {
            error!(error = %e, "Presence nudge: failed to list services");
            return;
        }
    };

    for service in services.iter().filter(|s| s.active) {
        let mut tokens = match state.db.tokens_by_service(&service.id) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, service_id = %service.id, "Presence nudge: skipping service");
                continue;
            }
        };

        tokens.retain(|t| t.status == TokenStatus::Active);
        tokens.sort_by_key(|t| t.queue_position);

        for token in tokens.iter().take(NUDGE_BATCH) {
            state.realtime.publish(
                EventScope::Token(token.id.clone()),
                QueueEvent::PresenceCheckRequired {
                    token_id: token.id.clone(),
                },
            );
            state.notifier.notify(
                &token.user_id,
                "presence_check",
                "Please confirm your presence",
                &format!("Your ticket {} is nearing its turn", token.ticket_number),
            );
        }
    }
}

/// Transition CALLED tokens past the grace window into NO_SHOW unless their
/// most recent presence check was in range.
pub fn run_no_show_sweep(state: &AppState) {
    let now = state.clock.now();
    let grace = chrono::Duration::seconds(state.config.queue.no_show_grace_seconds as i64);

    let tokens = match state.db.get_all_tokens() {
        Ok(tokens) => tokens,
        Err(e) => {
            error!(error = %e, "No-show sweep: failed to list tokens");
            return;
        }
    };

    for token in tokens {
        if token.status != TokenStatus::Called {
            continue;
        }
        let Some(called_at) = token.called_at else {
            continue;
        };
        if called_at + grace > now {
            continue;
        }

        match state.db.latest_presence_check(&token.id) {
            Ok(Some(check)) if check.is_within_geofence => continue,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, token_id = %token.id, "No-show sweep: skipping token");
                continue;
            }
        }

        match lifecycle::mark_no_show(&state.db, state.clock.as_ref(), &token.id) {
            Ok(no_show) => {
                state
                    .abuse
                    .report(&no_show.user_id, "no-show", 5, "Did not appear when called");
                state.realtime.publish(
                    EventScope::Token(no_show.id.clone()),
                    QueueEvent::TokenCancelled {
                        reason: no_show.cancel_reason.clone(),
                        token_id: no_show.id.clone(),
                    },
                );
                fanout::queue_changed(state, &no_show.service_id);
                debug!(token_id = %no_show.id, "Marked token as no-show");
            }
            // Someone else transitioned it first; nothing to do
            Err(QueueError::InvalidTransition) => {}
            Err(e) => {
                warn!(error = %e, token_id = %token.id, "No-show sweep: transition failed");
            }
        }
    }
}

/// Recompute wait estimates from current positions and broadcast per
/// service when anything changed.
pub fn run_wait_refresh(state: &AppState) {
    let services = match state.db.get_all_services() {
        Ok(services) => services,
        Err(e) => {
            error!(error = %e, "Wait refresh: failed to list services");
            return;
        }
    };

    for service in services.iter().filter(|s| s.active) {
        match lifecycle::refresh_wait_estimates(&state.db, service) {
            Ok(0) => {}
            Ok(refreshed) => {
                debug!(service_id = %service.id, count = refreshed, "Refreshed wait estimates");
                fanout::queue_changed(state, &service.id);
            }
            Err(e) => {
                warn!(error = %e, service_id = %service.id, "Wait refresh: skipping service");
            }
        }
    }
}

/// Force-expire tokens still queued from before the current day.
pub fn run_end_of_day(state: &AppState) {
    let now = state.clock.now();
    let day_start = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();

    let tokens = match state.db.get_all_tokens() {
        Ok(tokens) => tokens,
        Err(e) => {
            error!(error = %e, "End-of-day sweep: failed to list tokens");
            return;
        }
    };

    let mut touched_services = std::collections::HashSet::new();
    for token in tokens {
        if !token.status.is_queued() || token.created_at >= day_start {
            continue;
        }

        match lifecycle::expire(&state.db, state.clock.as_ref(), &token.id) {
            Ok(expired) => {
                state.realtime.publish(
                    EventScope::Token(expired.id.clone()),
                    QueueEvent::TokenCancelled {
                        reason: expired.cancel_reason.clone(),
                        token_id: expired.id.clone(),
                    },
                );
                touched_services.insert(expired.service_id);
            }
            Err(QueueError::InvalidTransition) => {}
            Err(e) => {
                warn!(error = %e, token_id = %token.id, "End-of-day sweep: expiry failed");
            }
        }
    }

    for service_id in touched_services {
        fanout::queue_changed(state, &service_id);
    }
}

//! Token state machine.
//!
//! `ACTIVE -> CALLED -> IN_SERVICE -> COMPLETED` is the happy path;
//! cancellation, no-show and end-of-day expiry branch off into the other
//! terminal states. Every transition re-checks the current status inside
//! its write transaction and fails with `InvalidTransition` instead of
//! clobbering a concurrent change.

use chrono::{DateTime, Duration, Utc};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::collab::AbuseSink;
use crate::config::QueueConfig;
use crate::queue::{ledger, QueueError};
use crate::storage::db::{push_index, read_service, read_token, write_service, write_token};
use crate::storage::models::{Service, Token, TokenStatus};
use crate::storage::{Database, DatabaseError, SERVICES, SERVICE_TOKENS, TOKENS, USER_TOKENS};

/// Bound on `active` listings
pub const ACTIVE_LIST_LIMIT: usize = 500;
/// Bound on `completed`/`terminal` listings
pub const HISTORY_LIST_LIMIT: usize = 100;

/// Who requested a cancellation.
#[derive(Debug, Clone)]
pub enum CancelActor {
    /// A background sweep or operator override
    System,
    /// Self-service cancel; must own the token
    User(String),
}

/// Listing groups exposed by the read surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListGroup {
    Active,
    Completed,
    Terminal,
}

impl ListGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            ListGroup::Active => "active",
            ListGroup::Completed => "completed",
            ListGroup::Terminal => "terminal",
        }
    }
}

impl FromStr for ListGroup {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ListGroup::Active),
            "completed" => Ok(ListGroup::Completed),
            "terminal" => Ok(ListGroup::Terminal),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Issue
// ============================================================================

/// Issue a new token for `user_id` against `service_id`.
///
/// All preconditions are checked before any write, in order; the first
/// failing one wins. Position assignment, the token insert and the service
/// counter increment commit as one transaction. A failed commit is retried
/// once before surfacing as `Conflict`.
pub fn issue(
    db: &Database,
    clock: &dyn Clock,
    limits: &QueueConfig,
    user_id: &str,
    service_id: &str,
) -> Result<Token, QueueError> {
    match try_issue(db, clock, limits, user_id, service_id) {
        Err(QueueError::Database(DatabaseError::Commit(e))) => {
            warn!(error = %e, service_id = %service_id, "Issue commit failed; retrying once");
            try_issue(db, clock, limits, user_id, service_id).map_err(|e| match e {
                QueueError::Database(DatabaseError::Commit(_)) => QueueError::Conflict,
                other => other,
            })
        }
        other => other,
    }
}

fn try_issue(
    db: &Database,
    clock: &dyn Clock,
    limits: &QueueConfig,
    user_id: &str,
    service_id: &str,
) -> Result<Token, QueueError> {
    let now = clock.now();
    let write_txn = db.begin_write()?;
    let token = {
        let mut services_table = write_txn.open_table(SERVICES)?;
        let mut tokens_table = write_txn.open_table(TOKENS)?;
        let mut service_index = write_txn.open_table(SERVICE_TOKENS)?;
        let mut user_index = write_txn.open_table(USER_TOKENS)?;

        let mut service = read_service(&services_table, service_id)?
            .filter(|s| s.active)
            .ok_or(QueueError::ServiceUnavailable)?;

        let user_tokens = {
            let mut tokens = Vec::new();
            for token_id in crate::storage::db::index_ids(&user_index, user_id)? {
                if let Some(token) = read_token(&tokens_table, &token_id)? {
                    tokens.push(token);
                }
            }
            tokens
        };

        if user_tokens
            .iter()
            .any(|t| t.service_id == service_id && t.status.is_queued())
        {
            return Err(QueueError::DuplicateActiveToken);
        }

        let issued_today = user_tokens
            .iter()
            .filter(|t| t.created_at >= day_start(now))
            .count() as u32;
        if issued_today >= limits.daily_token_limit {
            return Err(QueueError::DailyLimitExceeded);
        }

        let queued = ledger::queued_tokens(&tokens_table, &service_index, service_id)?;
        if queued.len() as u32 >= service.max_concurrent_tokens {
            return Err(QueueError::QueueFull);
        }

        // Per-service issuance sequence for today; unlike positions it is
        // never reused after compaction, so ticket numbers stay unique
        let mut daily_seq = 1u32;
        for token_id in crate::storage::db::index_ids(&service_index, service_id)? {
            if let Some(existing) = read_token(&tokens_table, &token_id)? {
                if existing.created_at >= day_start(now) {
                    daily_seq += 1;
                }
            }
        }

        let window_start = now - Duration::days(limits.suspension_window_days);
        let recent_no_shows = user_tokens
            .iter()
            .filter(|t| {
                t.status == TokenStatus::NoShow
                    && t.cancelled_at.is_some_and(|at| at >= window_start)
            })
            .count() as u32;
        if recent_no_shows >= limits.no_show_suspension_threshold {
            return Err(QueueError::UserSuspended);
        }

        let position = ledger::next_position(&queued);
        let token = Token {
            auto_cancelled: false,
            called_at: None,
            cancel_reason: None,
            cancelled_at: None,
            completed_at: None,
            created_at: now,
            estimated_wait_minutes: (position - 1) * service.estimated_service_minutes,
            id: uuid::Uuid::new_v4().to_string(),
            queue_position: position,
            service_id: service_id.to_string(),
            service_started_at: None,
            status: TokenStatus::Active,
            ticket_number: ticket_number(&service.name, daily_seq, now),
            user_id: user_id.to_string(),
        };

        write_token(&mut tokens_table, &token)?;
        push_index(&mut service_index, service_id, &token.id)?;
        push_index(&mut user_index, user_id, &token.id)?;

        service.tokens_issued += 1;
        write_service(&mut services_table, &service)?;

        token
    };
    write_txn.commit().map_err(DatabaseError::from)?;

    debug!(
        token_id = %token.id,
        ticket = %token.ticket_number,
        position = token.queue_position,
        service_id = %service_id,
        "Issued token"
    );
    Ok(token)
}

/// Ticket numbers are derived from the service name, the issue date and
/// the day's issuance sequence for the service, e.g. `CLI-260828-003`.
fn ticket_number(service_name: &str, sequence: u32, now: DateTime<Utc>) -> String {
    let prefix: String = service_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(3)
        .collect::<String>()
        .to_uppercase();
    let prefix = if prefix.is_empty() {
        "QUE".to_string()
    } else {
        prefix
    };
    format!("{prefix}-{}-{sequence:03}", now.format("%y%m%d"))
}

fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
}

// ============================================================================
// Call / serve / complete
// ============================================================================

/// Call the lowest-position ACTIVE token of a service to the counter.
///
/// Positions are untouched: a CALLED token still holds its slot.
pub fn call_next(db: &Database, clock: &dyn Clock, service_id: &str) -> Result<Token, QueueError> {
    let now = clock.now();
    let write_txn = db.begin_write()?;
    let token = {
        let index_table = write_txn.open_table(SERVICE_TOKENS)?;
        let mut tokens_table = write_txn.open_table(TOKENS)?;

        let queued = ledger::queued_tokens(&tokens_table, &index_table, service_id)?;
        let mut token = queued
            .into_iter()
            .filter(|t| t.status == TokenStatus::Active)
            .min_by_key(|t| t.queue_position)
            .ok_or(QueueError::EmptyQueue)?;

        token.status = TokenStatus::Called;
        token.called_at = Some(now);
        write_token(&mut tokens_table, &token)?;
        token
    };
    write_txn.commit().map_err(DatabaseError::from)?;

    debug!(token_id = %token.id, ticket = %token.ticket_number, "Called next token");
    Ok(token)
}

/// CALLED -> IN_SERVICE; the token leaves the queued set here, so its slot
/// is compacted away in the same transaction.
pub fn serve(db: &Database, clock: &dyn Clock, token_id: &str) -> Result<Token, QueueError> {
    let now = clock.now();
    let write_txn = db.begin_write()?;
    let token = {
        let index_table = write_txn.open_table(SERVICE_TOKENS)?;
        let mut tokens_table = write_txn.open_table(TOKENS)?;

        let mut token = read_token(&tokens_table, token_id)?.ok_or(QueueError::TokenNotFound)?;
        if token.status != TokenStatus::Called {
            return Err(QueueError::InvalidTransition);
        }
        let vacated = token.queue_position;
        token.status = TokenStatus::InService;
        token.service_started_at = Some(now);
        write_token(&mut tokens_table, &token)?;

        let queued = ledger::queued_tokens(&tokens_table, &index_table, &token.service_id)?;
        ledger::compact_tables(&mut tokens_table, queued, vacated)?;
        token
    };
    write_txn.commit().map_err(DatabaseError::from)?;

    debug!(token_id = %token.id, "Token now in service");
    Ok(token)
}

/// IN_SERVICE -> COMPLETED. The slot was already vacated and compacted at
/// `serve`; the retained `queue_position` on the token is historical.
pub fn complete(db: &Database, clock: &dyn Clock, token_id: &str) -> Result<Token, QueueError> {
    let now = clock.now();
    let write_txn = db.begin_write()?;
    let token = {
        let mut tokens_table = write_txn.open_table(TOKENS)?;
        let mut token = read_token(&tokens_table, token_id)?.ok_or(QueueError::TokenNotFound)?;
        if token.status != TokenStatus::InService {
            return Err(QueueError::InvalidTransition);
        }
        token.status = TokenStatus::Completed;
        token.completed_at = Some(now);
        write_token(&mut tokens_table, &token)?;
        token
    };
    write_txn.commit().map_err(DatabaseError::from)?;

    debug!(token_id = %token.id, "Token completed");
    Ok(token)
}

// ============================================================================
// Cancel / no-show / expire
// ============================================================================

/// ACTIVE|CALLED -> CANCELLED, with compaction in the same transaction.
///
/// A user actor must own the token. After the cancel commits, the rolling
/// per-user cancellation count (derived from the token records) is checked
/// and an abuse signal is emitted at the threshold — that signal never
/// blocks the cancel itself.
pub fn cancel(
    db: &Database,
    clock: &dyn Clock,
    abuse: &dyn AbuseSink,
    limits: &QueueConfig,
    token_id: &str,
    actor: CancelActor,
    reason: Option<String>,
) -> Result<Token, QueueError> {
    let now = clock.now();
    let write_txn = db.begin_write()?;
    let token = {
        let index_table = write_txn.open_table(SERVICE_TOKENS)?;
        let mut tokens_table = write_txn.open_table(TOKENS)?;

        let mut token = read_token(&tokens_table, token_id)?.ok_or(QueueError::TokenNotFound)?;
        if !token.status.is_queued() {
            return Err(QueueError::InvalidTransition);
        }
        if let CancelActor::User(actor_id) = &actor {
            if actor_id != &token.user_id {
                return Err(QueueError::NotOwner);
            }
        }

        let vacated = token.queue_position;
        token.status = TokenStatus::Cancelled;
        token.cancelled_at = Some(now);
        token.cancel_reason = reason;
        token.auto_cancelled = matches!(actor, CancelActor::System);
        write_token(&mut tokens_table, &token)?;

        let queued = ledger::queued_tokens(&tokens_table, &index_table, &token.service_id)?;
        ledger::compact_tables(&mut tokens_table, queued, vacated)?;
        token
    };
    write_txn.commit().map_err(DatabaseError::from)?;

    debug!(token_id = %token.id, "Token cancelled");

    match recent_cancellations(db, &token.user_id, now) {
        Ok(count) if count >= limits.cancel_abuse_threshold => {
            abuse.report(
                &token.user_id,
                "excessive_cancellations",
                5,
                &format!("{count} cancellations in the trailing hour"),
            );
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to compute cancellation count"),
    }

    Ok(token)
}

/// CALLED -> NO_SHOW (sweep only).
pub fn mark_no_show(db: &Database, clock: &dyn Clock, token_id: &str) -> Result<Token, QueueError> {
    force_out(
        db,
        clock,
        token_id,
        &[TokenStatus::Called],
        TokenStatus::NoShow,
        "no_show",
    )
}

/// ACTIVE|CALLED -> EXPIRED (end-of-day sweep only).
pub fn expire(db: &Database, clock: &dyn Clock, token_id: &str) -> Result<Token, QueueError> {
    force_out(
        db,
        clock,
        token_id,
        &[TokenStatus::Active, TokenStatus::Called],
        TokenStatus::Expired,
        "end_of_day_expiry",
    )
}

fn force_out(
    db: &Database,
    clock: &dyn Clock,
    token_id: &str,
    allowed: &[TokenStatus],
    target: TokenStatus,
    reason: &str,
) -> Result<Token, QueueError> {
    let now = clock.now();
    let write_txn = db.begin_write()?;
    let token = {
        let index_table = write_txn.open_table(SERVICE_TOKENS)?;
        let mut tokens_table = write_txn.open_table(TOKENS)?;

        let mut token = read_token(&tokens_table, token_id)?.ok_or(QueueError::TokenNotFound)?;
        if !allowed.contains(&token.status) {
            return Err(QueueError::InvalidTransition);
        }

        let vacated = token.queue_position;
        token.status = target;
        token.cancelled_at = Some(now);
        token.cancel_reason = Some(reason.to_string());
        token.auto_cancelled = true;
        write_token(&mut tokens_table, &token)?;

        let queued = ledger::queued_tokens(&tokens_table, &index_table, &token.service_id)?;
        ledger::compact_tables(&mut tokens_table, queued, vacated)?;
        token
    };
    write_txn.commit().map_err(DatabaseError::from)?;

    debug!(token_id = %token.id, status = ?token.status, "Token forced out by sweep");
    Ok(token)
}

/// Re-derive `estimated_wait_minutes` for a service's queued tokens from
/// their current positions, in one write transaction.
///
/// Status is re-read inside the transaction and only still-queued tokens
/// are touched, so a transition committed since any earlier read cannot be
/// clobbered. Returns how many tokens changed.
pub fn refresh_wait_estimates(db: &Database, service: &Service) -> Result<u32, QueueError> {
    let write_txn = db.begin_write()?;
    let refreshed = {
        let index_table = write_txn.open_table(SERVICE_TOKENS)?;
        let mut tokens_table = write_txn.open_table(TOKENS)?;

        let queued = ledger::queued_tokens(&tokens_table, &index_table, &service.id)?;
        let mut refreshed = 0u32;
        for mut token in queued {
            let expected = token.estimated_wait(service);
            if token.estimated_wait_minutes != expected {
                token.estimated_wait_minutes = expected;
                write_token(&mut tokens_table, &token)?;
                refreshed += 1;
            }
        }
        refreshed
    };
    write_txn.commit().map_err(DatabaseError::from)?;
    Ok(refreshed)
}

/// User cancellations (self-service, not sweep-forced) in the trailing hour.
fn recent_cancellations(
    db: &Database,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<u32, QueueError> {
    let hour_ago = now - Duration::hours(1);
    let count = db
        .tokens_by_user(user_id)?
        .iter()
        .filter(|t| {
            t.status == TokenStatus::Cancelled
                && !t.auto_cancelled
                && t.cancelled_at.is_some_and(|at| at >= hour_ago)
        })
        .count() as u32;
    Ok(count)
}

// ============================================================================
// Listings
// ============================================================================

/// Bounded token listings, optionally scoped to one service.
pub fn list(
    db: &Database,
    service_id: Option<&str>,
    group: ListGroup,
) -> Result<Vec<Token>, QueueError> {
    let mut tokens = match service_id {
        Some(id) => db.tokens_by_service(id)?,
        None => db.get_all_tokens()?,
    };

    match group {
        ListGroup::Active => {
            tokens.retain(|t| !t.status.is_terminal());
            tokens.sort_by_key(|t| (t.service_id.clone(), t.queue_position));
            tokens.truncate(ACTIVE_LIST_LIMIT);
        }
        ListGroup::Completed => {
            tokens.retain(|t| t.status == TokenStatus::Completed);
            tokens.sort_by_key(|t| std::cmp::Reverse(t.completed_at));
            tokens.truncate(HISTORY_LIST_LIMIT);
        }
        ListGroup::Terminal => {
            tokens.retain(|t| t.status.is_terminal());
            tokens.sort_by_key(|t| std::cmp::Reverse(ended_at(t)));
            tokens.truncate(HISTORY_LIST_LIMIT);
        }
    }

    Ok(tokens)
}

fn ended_at(token: &Token) -> Option<DateTime<Utc>> {
    token.completed_at.or(token.cancelled_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::TimeZone;
    use crate::testutil::{
        make_service, seed_service, setup_db, test_queue_config, RecordingAbuseSink,
    };

    fn issue_for(db: &Database, user: &str, service: &str) -> Result<Token, QueueError> {
        issue(db, &SystemClock, &test_queue_config(), user, service)
    }

    #[test]
    fn test_issue_happy_path() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");

        let token = issue_for(&db, "user-1", "svc-1").unwrap();
        assert_eq!(token.status, TokenStatus::Active);
        assert_eq!(token.queue_position, 1);
        assert_eq!(token.estimated_wait_minutes, 0);

        let second = issue_for(&db, "user-2", "svc-1").unwrap();
        assert_eq!(second.queue_position, 2);
        // 10-minute service time seeded by make_service
        assert_eq!(second.estimated_wait_minutes, 10);

        let service = db.get_service("svc-1").unwrap().unwrap();
        assert_eq!(service.tokens_issued, 2);
    }

    #[test]
    fn test_issue_unknown_or_inactive_service() {
        let (db, _temp) = setup_db();
        assert!(matches!(
            issue_for(&db, "user-1", "missing"),
            Err(QueueError::ServiceUnavailable)
        ));

        let mut service = make_service("svc-off");
        service.active = false;
        db.put_service(&service).unwrap();
        assert!(matches!(
            issue_for(&db, "user-1", "svc-off"),
            Err(QueueError::ServiceUnavailable)
        ));
    }

    #[test]
    fn test_issue_rejects_duplicate_active_token() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");

        issue_for(&db, "user-1", "svc-1").unwrap();
        assert!(matches!(
            issue_for(&db, "user-1", "svc-1"),
            Err(QueueError::DuplicateActiveToken)
        ));
    }

    #[test]
    fn test_daily_limit_spans_services() {
        let (db, _temp) = setup_db();
        for id in ["svc-1", "svc-2", "svc-3", "svc-4"] {
            seed_service(&db, id);
        }

        issue_for(&db, "user-1", "svc-1").unwrap();
        issue_for(&db, "user-1", "svc-2").unwrap();
        issue_for(&db, "user-1", "svc-3").unwrap();

        // Fourth issue today fails regardless of target service
        assert!(matches!(
            issue_for(&db, "user-1", "svc-4"),
            Err(QueueError::DailyLimitExceeded)
        ));
    }

    #[test]
    fn test_queue_full() {
        let (db, _temp) = setup_db();
        let mut service = make_service("svc-1");
        service.max_concurrent_tokens = 2;
        db.put_service(&service).unwrap();

        issue_for(&db, "user-1", "svc-1").unwrap();
        issue_for(&db, "user-2", "svc-1").unwrap();
        assert!(matches!(
            issue_for(&db, "user-3", "svc-1"),
            Err(QueueError::QueueFull)
        ));
    }

    #[test]
    fn test_repeated_no_shows_suspend_the_user() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = SystemClock;
        let mut limits = test_queue_config();
        limits.daily_token_limit = 10;

        for _ in 0..3 {
            let token = issue(&db, &clock, &limits, "user-1", "svc-1").unwrap();
            call_next(&db, &clock, "svc-1").unwrap();
            mark_no_show(&db, &clock, &token.id).unwrap();
        }

        assert!(matches!(
            issue(&db, &clock, &limits, "user-1", "svc-1"),
            Err(QueueError::UserSuspended)
        ));
    }

    #[test]
    fn test_call_next_takes_lowest_position() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");

        let first = issue_for(&db, "user-1", "svc-1").unwrap();
        issue_for(&db, "user-2", "svc-1").unwrap();

        let called = call_next(&db, &SystemClock, "svc-1").unwrap();
        assert_eq!(called.id, first.id);
        assert_eq!(called.status, TokenStatus::Called);
        assert!(called.called_at.is_some());
        // Calling does not move positions
        assert_eq!(called.queue_position, 1);
    }

    #[test]
    fn test_call_next_empty_queue() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        assert!(matches!(
            call_next(&db, &SystemClock, "svc-1"),
            Err(QueueError::EmptyQueue)
        ));
    }

    #[test]
    fn test_serve_and_complete() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = SystemClock;

        let token = issue_for(&db, "user-1", "svc-1").unwrap();
        issue_for(&db, "user-2", "svc-1").unwrap();

        // Serve requires CALLED
        assert!(matches!(
            serve(&db, &clock, &token.id),
            Err(QueueError::InvalidTransition)
        ));

        call_next(&db, &clock, "svc-1").unwrap();
        let served = serve(&db, &clock, &token.id).unwrap();
        assert_eq!(served.status, TokenStatus::InService);
        assert!(served.service_started_at.is_some());

        // Entering service vacates the slot: second token moved to 1
        let waiting_position = |db: &Database| {
            db.tokens_by_service("svc-1")
                .unwrap()
                .iter()
                .find(|t| t.status == TokenStatus::Active)
                .unwrap()
                .queue_position
        };
        assert_eq!(waiting_position(&db), 1);

        let completed = complete(&db, &clock, &token.id).unwrap();
        assert_eq!(completed.status, TokenStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(waiting_position(&db), 1);
    }

    #[test]
    fn test_cancel_requires_ownership() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let abuse = RecordingAbuseSink::default();

        let token = issue_for(&db, "user-1", "svc-1").unwrap();
        let err = cancel(
            &db,
            &SystemClock,
            &abuse,
            &test_queue_config(),
            &token.id,
            CancelActor::User("someone-else".to_string()),
            None,
        );
        assert!(matches!(err, Err(QueueError::NotOwner)));

        // Token unchanged
        let stored = db.get_token(&token.id).unwrap().unwrap();
        assert_eq!(stored.status, TokenStatus::Active);
    }

    #[test]
    fn test_system_cancel_sets_auto_flag() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let abuse = RecordingAbuseSink::default();

        let token = issue_for(&db, "user-1", "svc-1").unwrap();
        let cancelled = cancel(
            &db,
            &SystemClock,
            &abuse,
            &test_queue_config(),
            &token.id,
            CancelActor::System,
            Some("operator override".to_string()),
        )
        .unwrap();

        assert!(cancelled.auto_cancelled);
        assert_eq!(cancelled.cancel_reason.as_deref(), Some("operator override"));
    }

    #[test]
    fn test_excessive_cancellations_emit_abuse_signal() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = SystemClock;
        let abuse = RecordingAbuseSink::default();
        let mut limits = test_queue_config();
        limits.daily_token_limit = 10;

        for _ in 0..limits.cancel_abuse_threshold {
            let token = issue(&db, &clock, &limits, "user-1", "svc-1").unwrap();
            cancel(
                &db,
                &clock,
                &abuse,
                &limits,
                &token.id,
                CancelActor::User("user-1".to_string()),
                None,
            )
            .unwrap();
        }

        let reports = abuse.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1, "excessive_cancellations");
        assert_eq!(reports[0].2, 5);
    }

    #[test]
    fn test_terminal_states_are_closed() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = SystemClock;
        let abuse = RecordingAbuseSink::default();
        let limits = test_queue_config();

        let token = issue(&db, &clock, &limits, "user-1", "svc-1").unwrap();
        cancel(
            &db,
            &clock,
            &abuse,
            &limits,
            &token.id,
            CancelActor::User("user-1".to_string()),
            None,
        )
        .unwrap();

        // Every transition out of a terminal state fails and mutates nothing
        assert!(matches!(
            serve(&db, &clock, &token.id),
            Err(QueueError::InvalidTransition)
        ));
        assert!(matches!(
            complete(&db, &clock, &token.id),
            Err(QueueError::InvalidTransition)
        ));
        assert!(matches!(
            cancel(
                &db,
                &clock,
                &abuse,
                &limits,
                &token.id,
                CancelActor::User("user-1".to_string()),
                None
            ),
            Err(QueueError::InvalidTransition)
        ));
        assert!(matches!(
            mark_no_show(&db, &clock, &token.id),
            Err(QueueError::InvalidTransition)
        ));
        assert!(matches!(
            expire(&db, &clock, &token.id),
            Err(QueueError::InvalidTransition)
        ));

        let stored = db.get_token(&token.id).unwrap().unwrap();
        assert_eq!(stored.status, TokenStatus::Cancelled);
    }

    #[test]
    fn test_ticket_number_format() {
        let now = chrono::Utc
            .with_ymd_and_hms(2026, 8, 28, 9, 30, 0)
            .unwrap();
        assert_eq!(ticket_number("Clinic Desk", 3, now), "CLI-260828-003");
        assert_eq!(ticket_number("x", 14, now), "X-260828-014");
        assert_eq!(ticket_number("---", 1, now), "QUE-260828-001");
    }

    #[test]
    fn test_ticket_numbers_survive_position_reuse() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = SystemClock;
        let abuse = RecordingAbuseSink::default();
        let limits = test_queue_config();

        let first = issue(&db, &clock, &limits, "user-1", "svc-1").unwrap();
        cancel(
            &db,
            &clock,
            &abuse,
            &limits,
            &first.id,
            CancelActor::User("user-1".to_string()),
            None,
        )
        .unwrap();

        // Position 1 is vacated and reassigned, but the ticket number
        // advances with the day's issuance sequence
        let second = issue(&db, &clock, &limits, "user-2", "svc-1").unwrap();
        assert_eq!(second.queue_position, first.queue_position);
        assert_ne!(second.ticket_number, first.ticket_number);
        assert!(first.ticket_number.ends_with("-001"));
        assert!(second.ticket_number.ends_with("-002"));
    }

    #[test]
    fn test_list_groups() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = SystemClock;
        let abuse = RecordingAbuseSink::default();
        let limits = test_queue_config();

        let t1 = issue(&db, &clock, &limits, "user-1", "svc-1").unwrap();
        let _t2 = issue(&db, &clock, &limits, "user-2", "svc-1").unwrap();
        let t3 = issue(&db, &clock, &limits, "user-3", "svc-1").unwrap();

        call_next(&db, &clock, "svc-1").unwrap();
        serve(&db, &clock, &t1.id).unwrap();
        complete(&db, &clock, &t1.id).unwrap();
        cancel(
            &db,
            &clock,
            &abuse,
            &limits,
            &t3.id,
            CancelActor::User("user-3".to_string()),
            None,
        )
        .unwrap();

        let active = list(&db, Some("svc-1"), ListGroup::Active).unwrap();
        assert_eq!(active.len(), 1);

        let completed = list(&db, Some("svc-1"), ListGroup::Completed).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, t1.id);

        let terminal = list(&db, Some("svc-1"), ListGroup::Terminal).unwrap();
        assert_eq!(terminal.len(), 2);
    }
}

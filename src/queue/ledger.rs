//! Queue Ledger: per-service position math.
//!
//! Among tokens of one service with status in {ACTIVE, CALLED} ("queued"),
//! positions must always form a contiguous run `1..N`, ordered by arrival.
//! Every position mutation flows through here, and each mutation is one
//! redb write transaction — the single-writer transaction is the atomic
//! unit that keeps concurrent issuance and compaction from interleaving.

use redb::{ReadableTable, Table};
use serde::Serialize;

use crate::storage::db::{index_ids, read_token, write_token};
use crate::storage::models::Token;
use crate::storage::{DatabaseError, SERVICE_TOKENS, TOKENS};
use crate::queue::QueueError;
use crate::storage::Database;

/// Position lookup result for one token.
#[derive(Debug, Clone, Serialize)]
pub struct QueuePosition {
    pub ahead: u32,
    pub behind: u32,
    /// `None` when the token is not currently in a queued state
    pub position: Option<u32>,
    pub total: u32,
}

/// Load the queued (ACTIVE/CALLED) tokens of a service from open tables.
pub(crate) fn queued_tokens(
    tokens_table: &impl ReadableTable<&'static str, &'static [u8]>,
    index_table: &impl ReadableTable<&'static str, &'static [u8]>,
    service_id: &str,
) -> Result<Vec<Token>, DatabaseError> {
    let mut queued = Vec::new();
    for token_id in index_ids(index_table, service_id)? {
        if let Some(token) = read_token(tokens_table, &token_id)? {
            if token.status.is_queued() {
                queued.push(token);
            }
        }
    }
    Ok(queued)
}

/// Next free position: `max(queued positions) + 1`, or 1 on an empty queue.
///
/// Only meaningful when computed inside the same write transaction that
/// inserts the token claiming it.
pub(crate) fn next_position(queued: &[Token]) -> u32 {
    queued
        .iter()
        .map(|t| t.queue_position)
        .max()
        .map_or(1, |max| max + 1)
}

/// Close the gap left at `vacated` by decrementing every queued token with
/// a higher position. One bulk pass inside the caller's transaction.
///
/// A queued token already sitting at `vacated` means the gap no longer
/// exists (the compaction already ran, or issuance refilled it), so the
/// pass is skipped — re-running a compaction is a no-op.
pub(crate) fn compact_tables(
    tokens_table: &mut Table<'_, &'static str, &'static [u8]>,
    queued: Vec<Token>,
    vacated: u32,
) -> Result<u32, DatabaseError> {
    if queued.iter().any(|t| t.queue_position == vacated) {
        return Ok(0);
    }

    let mut shifted = 0u32;
    for mut token in queued {
        if token.queue_position > vacated {
            token.queue_position -= 1;
            write_token(tokens_table, &token)?;
            shifted += 1;
        }
    }
    Ok(shifted)
}

/// Standalone compaction of one vacated position, in its own transaction.
pub fn compact(db: &Database, service_id: &str, vacated: u32) -> Result<u32, QueueError> {
    let write_txn = db.begin_write()?;
    let shifted = {
        let index_table = write_txn.open_table(SERVICE_TOKENS)?;
        let mut tokens_table = write_txn.open_table(TOKENS)?;
        let queued = queued_tokens(&tokens_table, &index_table, service_id)?;
        compact_tables(&mut tokens_table, queued, vacated)?
    };
    write_txn.commit().map_err(DatabaseError::from)?;

    if shifted > 0 {
        tracing::debug!(service_id = %service_id, vacated, shifted, "Compacted queue positions");
    }
    Ok(shifted)
}

/// Where a token currently stands in its service's queue.
pub fn position_of(db: &Database, token_id: &str) -> Result<QueuePosition, QueueError> {
    let read_txn = db.begin_read()?;
    let tokens_table = read_txn.open_table(TOKENS)?;
    let index_table = read_txn.open_table(SERVICE_TOKENS)?;

    let token = read_token(&tokens_table, token_id)?.ok_or(QueueError::TokenNotFound)?;
    let queued = queued_tokens(&tokens_table, &index_table, &token.service_id)?;
    let total = queued.len() as u32;

    if !token.status.is_queued() {
        return Ok(QueuePosition {
            ahead: 0,
            behind: 0,
            position: None,
            total,
        });
    }

    let ahead = queued
        .iter()
        .filter(|t| t.queue_position < token.queue_position)
        .count() as u32;
    let behind = queued
        .iter()
        .filter(|t| t.queue_position > token.queue_position)
        .count() as u32;

    Ok(QueuePosition {
        ahead,
        behind,
        position: Some(token.queue_position),
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::lifecycle::{self, CancelActor};
    use crate::testutil::{seed_service, setup_db, test_queue_config, RecordingAbuseSink};

    fn issue_n(db: &Database, n: usize) -> Vec<Token> {
        let clock = crate::clock::SystemClock;
        let limits = test_queue_config();
        (0..n)
            .map(|i| {
                lifecycle::issue(db, &clock, &limits, &format!("user-{i}"), "svc-1").unwrap()
            })
            .collect()
    }

    fn queued_positions(db: &Database) -> Vec<u32> {
        let mut positions: Vec<u32> = db
            .tokens_by_service("svc-1")
            .unwrap()
            .into_iter()
            .filter(|t| t.status.is_queued())
            .map(|t| t.queue_position)
            .collect();
        positions.sort_unstable();
        positions
    }

    #[test]
    fn test_next_position_on_empty_queue() {
        assert_eq!(next_position(&[]), 1);
    }

    #[test]
    fn test_monotonic_issuance() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");

        let tokens = issue_n(&db, 5);
        let positions: Vec<u32> = tokens.iter().map(|t| t.queue_position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_compaction_closes_the_gap() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = crate::clock::SystemClock;
        let limits = test_queue_config();
        let abuse = RecordingAbuseSink::default();

        let tokens = issue_n(&db, 5);

        // Cancel position 3; remaining positions become 1,2,3,4
        lifecycle::cancel(
            &db,
            &clock,
            &abuse,
            &limits,
            &tokens[2].id,
            CancelActor::User("user-2".to_string()),
            Some("changed my mind".to_string()),
        )
        .unwrap();

        assert_eq!(queued_positions(&db), vec![1, 2, 3, 4]);

        // Relative order preserved
        let remaining = db.tokens_by_service("svc-1").unwrap();
        let pos = |id: &str| {
            remaining
                .iter()
                .find(|t| t.id == id)
                .unwrap()
                .queue_position
        };
        assert_eq!(pos(&tokens[0].id), 1);
        assert_eq!(pos(&tokens[1].id), 2);
        assert_eq!(pos(&tokens[3].id), 3);
        assert_eq!(pos(&tokens[4].id), 4);
    }

    #[test]
    fn test_compaction_is_idempotent() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = crate::clock::SystemClock;
        let limits = test_queue_config();
        let abuse = RecordingAbuseSink::default();

        let tokens = issue_n(&db, 5);
        lifecycle::cancel(
            &db,
            &clock,
            &abuse,
            &limits,
            &tokens[2].id,
            CancelActor::User("user-2".to_string()),
            None,
        )
        .unwrap();

        let after_first = queued_positions(&db);
        assert_eq!(after_first, vec![1, 2, 3, 4]);

        // Re-running the compaction for the same vacated slot changes nothing
        let shifted = compact(&db, "svc-1", 3).unwrap();
        assert_eq!(shifted, 0);
        assert_eq!(queued_positions(&db), after_first);
    }

    #[test]
    fn test_position_lookup() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let tokens = issue_n(&db, 4);

        let lookup = position_of(&db, &tokens[1].id).unwrap();
        assert_eq!(lookup.position, Some(2));
        assert_eq!(lookup.ahead, 1);
        assert_eq!(lookup.behind, 2);
        assert_eq!(lookup.total, 4);
    }

    #[test]
    fn test_position_lookup_for_terminal_token_is_none() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = crate::clock::SystemClock;
        let limits = test_queue_config();
        let abuse = RecordingAbuseSink::default();
        let tokens = issue_n(&db, 2);

        lifecycle::cancel(
            &db,
            &clock,
            &abuse,
            &limits,
            &tokens[0].id,
            CancelActor::User("user-0".to_string()),
            None,
        )
        .unwrap();

        let lookup = position_of(&db, &tokens[0].id).unwrap();
        assert_eq!(lookup.position, None);
        assert_eq!(lookup.total, 1);
    }

    #[test]
    fn test_position_lookup_unknown_token() {
        let (db, _temp) = setup_db();
        assert!(matches!(
            position_of(&db, "missing"),
            Err(QueueError::TokenNotFound)
        ));
    }

    #[test]
    fn test_contiguity_when_cancel_overlaps_service() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = crate::clock::SystemClock;
        let limits = test_queue_config();
        let abuse = RecordingAbuseSink::default();

        let tokens = issue_n(&db, 3);

        // First two tokens are at the counter; the second one goes into
        // service while the first is still CALLED
        lifecycle::call_next(&db, &clock, "svc-1").unwrap();
        lifecycle::call_next(&db, &clock, "svc-1").unwrap();
        lifecycle::serve(&db, &clock, &tokens[1].id).unwrap();

        // The CALLED head gives up while the other is being served
        lifecycle::cancel(
            &db,
            &clock,
            &abuse,
            &limits,
            &tokens[0].id,
            CancelActor::User("user-0".to_string()),
            None,
        )
        .unwrap();

        lifecycle::complete(&db, &clock, &tokens[1].id).unwrap();

        // The remaining waiter holds position 1, not a phantom gap
        assert_eq!(queued_positions(&db), vec![1]);
        let lookup = position_of(&db, &tokens[2].id).unwrap();
        assert_eq!(lookup.position, Some(1));
        assert_eq!(lookup.ahead, 0);
    }

    #[test]
    fn test_contiguity_under_mixed_transitions() {
        let (db, _temp) = setup_db();
        seed_service(&db, "svc-1");
        let clock = crate::clock::SystemClock;
        let limits = test_queue_config();
        let abuse = RecordingAbuseSink::default();

        let tokens = issue_n(&db, 6);

        lifecycle::cancel(
            &db,
            &clock,
            &abuse,
            &limits,
            &tokens[1].id,
            CancelActor::User("user-1".to_string()),
            None,
        )
        .unwrap();
        lifecycle::cancel(
            &db,
            &clock,
            &abuse,
            &limits,
            &tokens[4].id,
            CancelActor::User("user-4".to_string()),
            None,
        )
        .unwrap();

        // 6 issued, 2 cancelled: queued positions must be exactly 1..4
        assert_eq!(queued_positions(&db), vec![1, 2, 3, 4]);
    }
}

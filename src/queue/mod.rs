//! Queue ordering and token lifecycle engine.
//!
//! `ledger` owns the contiguous-position invariant; `lifecycle` owns the
//! token state machine and calls into the ledger whenever a token enters
//! or leaves the queued set.

pub mod ledger;
pub mod lifecycle;

use thiserror::Error;

use crate::storage::DatabaseError;

/// Failure taxonomy for queue operations.
///
/// Everything except `Database` and `Conflict` is an expected precondition
/// failure, returned before any write happens.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Write conflict, try again")]
    Conflict,
    #[error("Daily token limit reached")]
    DailyLimitExceeded,
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("User already holds an active token for this service")]
    DuplicateActiveToken,
    #[error("No waiting tokens in the queue")]
    EmptyQueue,
    #[error("Token is not in a state that allows this transition")]
    InvalidTransition,
    #[error("Actor does not own this token")]
    NotOwner,
    #[error("Queue is at capacity")]
    QueueFull,
    #[error("Service not found or not active")]
    ServiceUnavailable,
    #[error("Token not found")]
    TokenNotFound,
    #[error("User is suspended after repeated no-shows")]
    UserSuspended,
}

// Table opens happen inside queue transactions; route their errors through
// the storage taxonomy.
impl From<redb::TableError> for QueueError {
    fn from(e: redb::TableError) -> Self {
        QueueError::Database(DatabaseError::from(e))
    }
}

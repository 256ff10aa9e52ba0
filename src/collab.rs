//! Narrow interfaces to external collaborators.
//!
//! Abuse-log bookkeeping and notification delivery live outside this
//! service; the queue core only emits signals through these traits.
//! Both are fire-and-forget and must never block or fail a queue operation.

use tracing::info;

/// Sink for abuse signals (excessive cancellations, no-shows).
pub trait AbuseSink: Send + Sync {
    fn report(&self, user_id: &str, event_type: &str, severity: u8, description: &str);
}

/// Dispatcher for user-facing notifications (push/email copy is external).
pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: &str, kind: &str, title: &str, message: &str);
}

/// Default sink: records the signal in the service log only.
pub struct LogAbuseSink;

impl AbuseSink for LogAbuseSink {
    fn report(&self, user_id: &str, event_type: &str, severity: u8, description: &str) {
        info!(
            user_id = %user_id,
            event_type = %event_type,
            severity = severity,
            description = %description,
            "Abuse signal emitted"
        );
    }
}

/// Default dispatcher: records the notification in the service log only.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, user_id: &str, kind: &str, title: &str, message: &str) {
        info!(
            user_id = %user_id,
            kind = %kind,
            title = %title,
            message = %message,
            "Notification dispatched"
        );
    }
}

//! Cross-cutting failure observers for the event pipeline.

use commutator_core::Message;

/// Receives event messages whose dispatch failed.
///
/// The event pipeline does not interrupt the raiser on failure by default;
/// it records the failure on the message and forwards the message here so
/// diagnostics collaborators still see it.
pub trait FailureObserver: Send + Sync {
    fn on_failure(&self, message: &Message);
}

/// Forwards failed event messages to the `tracing` error stream.
pub struct TracingFailureObserver;

impl FailureObserver for TracingFailureObserver {
    fn on_failure(&self, message: &Message) {
        if let Some(failure) = message.failure() {
            tracing::error!(
                message_id = %message.id(),
                payload = failure.payload_type(),
                handler = failure.handler_type(),
                error = %failure,
                "event handler failed"
            );
        }
    }
}

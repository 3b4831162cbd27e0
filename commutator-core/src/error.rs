// Error types for the commutator dispatch engine

use crate::failure::DispatchFailure;
use crate::message::MessageKind;
use thiserror::Error;

/// Errors surfaced by pipelines, middleware, and the service provider.
///
/// Configuration faults (`HandlerNotFound`, `KindNotAccepted`,
/// `InvalidPipelineState`, `ProviderNotFound`) abort a dispatch immediately.
/// `HandlerFailed` and `Cancelled` wrap a [`DispatchFailure`] and preserve
/// the original error value raised by the handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no handler registered for payload type `{0}`")]
    HandlerNotFound(&'static str),

    #[error("message kind `{0:?}` is not accepted by this pipeline")]
    KindNotAccepted(MessageKind),

    #[error("provider not found: {0}")]
    ProviderNotFound(&'static str),

    #[error("{0}")]
    InvalidPipelineState(String),

    #[error(transparent)]
    HandlerFailed(DispatchFailure),

    #[error("{0}")]
    Cancelled(DispatchFailure),

    #[error("raw message reconstitution is not supported")]
    RawReconstitutionUnsupported,
}

impl DispatchError {
    /// The captured failure, when this error re-raises one.
    pub fn failure(&self) -> Option<&DispatchFailure> {
        match self {
            Self::HandlerFailed(failure) | Self::Cancelled(failure) => Some(failure),
            _ => None,
        }
    }

    /// Whether this error reports cooperative cancellation rather than a
    /// handler or configuration fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_not_found_names_the_payload_type() {
        let error = DispatchError::HandlerNotFound("app::CreateUser");
        assert!(error.to_string().contains("app::CreateUser"));
        assert!(error.failure().is_none());
    }

    #[test]
    fn kind_not_accepted_is_not_a_cancellation() {
        let error = DispatchError::KindNotAccepted(MessageKind::Event);
        assert!(!error.is_cancellation());
    }
}

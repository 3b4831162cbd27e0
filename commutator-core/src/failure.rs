//! Failure capture with original-identity preservation.
//!
//! When a handler fails, the pipeline does not replace the error with a
//! generic wrapper. The original error value is captured into a
//! [`DispatchFailure`] together with a backtrace taken at the point of
//! failure, and can be re-raised later with [`DispatchFailure::reraise`] or
//! type-tested with [`DispatchFailure::downcast_ref`].

use crate::error::DispatchError;
use serde::Serialize;
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

/// Classifies a captured failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler's own operation raised an error.
    Handler,
    /// Cancellation was requested before the handler was invoked.
    Cancelled,
}

/// Raw capture of a handler error, before the executor attaches message
/// context to it.
pub(crate) struct CapturedFault {
    message: String,
    source: Arc<dyn std::error::Error + Send + Sync>,
    token: Arc<dyn Any + Send + Sync>,
    backtrace: Arc<Backtrace>,
}

impl CapturedFault {
    /// Capture an error, keeping the original value alive for later
    /// downcasting and re-raise.
    pub(crate) fn capture<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let message = error.to_string();
        let shared = Arc::new(error);
        let source: Arc<dyn std::error::Error + Send + Sync> = shared.clone();
        Self {
            message,
            source,
            token: shared,
            backtrace: Arc::new(Backtrace::capture()),
        }
    }
}

/// A failure recorded on a [`Message`](crate::Message).
///
/// Present on a message if and only if its status is
/// [`ProcessingStatus::Failed`](crate::ProcessingStatus::Failed). The failure
/// keeps the original error value (the re-raise token), so callers can
/// type-test the exact error type the handler raised even after the error
/// crossed the dispatch boundary:
///
/// ```rust,ignore
/// match pipeline.handle_command(cmd) {
///     Err(err) => {
///         let failure = err.failure().unwrap();
///         if let Some(domain) = failure.downcast_ref::<OutOfStock>() {
///             // the very same error the handler returned
///         }
///     }
///     Ok(_) => {}
/// }
/// ```
#[derive(Clone)]
pub struct DispatchFailure {
    kind: FailureKind,
    message: String,
    payload_type: &'static str,
    handler_type: &'static str,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    token: Option<Arc<dyn Any + Send + Sync>>,
    backtrace: Arc<Backtrace>,
}

impl DispatchFailure {
    pub(crate) fn handler(
        fault: CapturedFault,
        payload_type: &'static str,
        handler_type: &'static str,
    ) -> Self {
        Self {
            kind: FailureKind::Handler,
            message: fault.message,
            payload_type,
            handler_type,
            source: Some(fault.source),
            token: Some(fault.token),
            backtrace: fault.backtrace,
        }
    }

    pub(crate) fn cancelled(payload_type: &'static str, handler_type: &'static str) -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "cancellation was requested before the handler ran".to_string(),
            payload_type,
            handler_type,
            source: None,
            token: None,
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    /// The failure classification.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Display text of the original error.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Type name of the payload whose dispatch failed.
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// Type name of the handler that raised the failure.
    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    /// Backtrace captured at the point of failure.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Whether the original error is of type `E`.
    pub fn is<E: Any>(&self) -> bool {
        self.token.as_ref().is_some_and(|token| token.is::<E>())
    }

    /// Borrow the original error as its concrete type.
    ///
    /// Returns `None` for cancellation failures, which carry no error value.
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.token.as_ref()?.downcast_ref::<E>()
    }

    /// Re-raise the failure as a [`DispatchError`] that still carries the
    /// original error value and backtrace.
    pub fn reraise(&self) -> DispatchError {
        match self.kind {
            FailureKind::Handler => DispatchError::HandlerFailed(self.clone()),
            FailureKind::Cancelled => DispatchError::Cancelled(self.clone()),
        }
    }
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Handler => write!(
                f,
                "handler `{}` failed for `{}`: {}",
                self.handler_type, self.payload_type, self.message
            ),
            FailureKind::Cancelled => write!(
                f,
                "dispatch of `{}` was cancelled before handler `{}` ran",
                self.payload_type, self.handler_type
            ),
        }
    }
}

impl fmt::Debug for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchFailure")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("payload_type", &self.payload_type)
            .field("handler_type", &self.handler_type)
            .finish()
    }
}

impl std::error::Error for DispatchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

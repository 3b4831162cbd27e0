// Stub handlers for exercising pipelines

use async_trait::async_trait;
use commutator_core::{AsyncHandler, Handler, Provider, ServiceProvider};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Error raised by the failing stub handlers. Tests downcast a captured
/// failure back to this type to check identity preservation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stub handler failed: {0}")]
pub struct StubFailure(pub String);

/// Handler that counts invocations and otherwise succeeds.
///
/// Handles any payload type, so one stub covers command and event
/// registrations. Register the same instance in the [`ServiceProvider`] so
/// the counter observed by the test is the one the pipeline invokes:
///
/// ```rust,ignore
/// let handler = CountingHandler::new();
/// services.register(handler.clone());
/// let registry = HandlerRegistry::builder()
///     .command::<MyCommand, CountingHandler>()
///     .build();
/// // ... dispatch ...
/// assert_eq!(handler.invocations(), 1);
/// ```
#[derive(Clone, Default)]
pub struct CountingHandler {
    invocations: Arc<AtomicU32>,
}

impl CountingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the pipeline invoked this handler.
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Provider for CountingHandler {}

impl<M: Send + 'static> Handler<M> for CountingHandler {
    type Error = Infallible;

    fn handle(&self, _payload: &mut M, _services: &ServiceProvider) -> Result<(), Infallible> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Asynchronous counterpart of [`CountingHandler`].
#[derive(Clone, Default)]
pub struct CountingAsyncHandler {
    invocations: Arc<AtomicU32>,
}

impl CountingAsyncHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Provider for CountingAsyncHandler {}

#[async_trait]
impl<M: Send + 'static> AsyncHandler<M> for CountingAsyncHandler {
    type Error = Infallible;

    async fn handle(&self, _payload: &mut M, _services: &ServiceProvider) -> Result<(), Infallible> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that always fails with a [`StubFailure`].
#[derive(Clone)]
pub struct FailingHandler {
    reason: String,
}

impl FailingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for FailingHandler {
    fn default() -> Self {
        Self {
            reason: "stub failure".to_string(),
        }
    }
}

impl Provider for FailingHandler {}

impl<M: Send + 'static> Handler<M> for FailingHandler {
    type Error = StubFailure;

    fn handle(&self, _payload: &mut M, _services: &ServiceProvider) -> Result<(), StubFailure> {
        Err(StubFailure(self.reason.clone()))
    }
}

/// Asynchronous counterpart of [`FailingHandler`].
#[derive(Clone)]
pub struct FailingAsyncHandler {
    reason: String,
}

impl FailingAsyncHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for FailingAsyncHandler {
    fn default() -> Self {
        Self {
            reason: "stub failure".to_string(),
        }
    }
}

impl Provider for FailingAsyncHandler {}

#[async_trait]
impl<M: Send + 'static> AsyncHandler<M> for FailingAsyncHandler {
    type Error = StubFailure;

    async fn handle(&self, _payload: &mut M, _services: &ServiceProvider) -> Result<(), StubFailure> {
        Err(StubFailure(self.reason.clone()))
    }
}

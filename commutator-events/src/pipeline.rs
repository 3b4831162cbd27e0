//! Fire-and-forget event pipeline.

use crate::observer::FailureObserver;
use crate::raw::RawMessage;
use commutator_core::{
    CancellationToken, DispatchError, HandlerExecutorMiddleware, HandlerLocatorMiddleware,
    HandlerRegistry, HandlerResolverMiddleware, Message, MessageKind, MessagePipeline, Middleware,
    ProcessingStatus, ServiceProvider,
};
use std::sync::Arc;
use tracing::debug;

/// Pipeline specialization for event messages.
///
/// Events are notifications: the raiser does not wait for a result and, by
/// default, is not interrupted when a handler fails. `raise` drives the
/// message through the same locator, resolver, executor chain commands
/// use, records any failure on the returned message, and forwards failed
/// messages to the registered [`FailureObserver`]s. A deployment can opt
/// into command-style re-raising with
/// [`EventPipelineBuilder::rethrow_failures`].
///
/// Events with no registered handler are rejected silently; raising a
/// notification nobody listens to is not an error.
pub struct EventPipeline {
    inner: MessagePipeline,
    observers: Vec<Arc<dyn FailureObserver>>,
}

impl EventPipeline {
    /// An event pipeline with the default middleware chain and failure
    /// policy.
    pub fn new(registry: Arc<HandlerRegistry>, services: ServiceProvider) -> Self {
        Self::builder(registry).services(services).build()
    }

    /// Start building an event pipeline.
    pub fn builder(registry: Arc<HandlerRegistry>) -> EventPipelineBuilder {
        EventPipelineBuilder {
            registry,
            services: None,
            middlewares: Vec::new(),
            observers: Vec::new(),
            rethrow_failures: false,
            include_execution_duration: true,
        }
    }

    /// The underlying message pipeline.
    pub fn pipeline(&self) -> &MessagePipeline {
        &self.inner
    }

    /// Raise an event synchronously.
    ///
    /// Returns the dispatched message so the raiser can inspect status,
    /// duration, and failure. Only configuration faults (or a recorded
    /// failure, when re-raising was opted into) surface as `Err`.
    pub fn raise<E: Send + 'static>(&self, event: E) -> Result<Message, DispatchError> {
        let mut message = Message::event(event);
        let outcome = self.inner.dispatch(&mut message);
        self.notify(&message);
        outcome.map(|_| message)
    }

    /// Raise an event asynchronously.
    pub async fn raise_async<E: Send + 'static>(
        &self,
        event: E,
        cancel: &CancellationToken,
    ) -> Result<Message, DispatchError> {
        let mut message = Message::event(event);
        let outcome = self.inner.dispatch_async(&mut message, cancel).await;
        self.notify(&message);
        outcome.map(|_| message)
    }

    /// Reconstitute and dispatch a previously serialized message.
    ///
    /// Declared for parity with transports that persist envelopes, but
    /// intentionally unsupported in this core: payloads are opaque to the
    /// pipeline, so there is nothing to deserialize them into.
    pub fn process_raw(&self, raw: RawMessage) -> Result<Message, DispatchError> {
        debug!(content_type = %raw.content_type, "raw reconstitution requested");
        Err(DispatchError::RawReconstitutionUnsupported)
    }

    fn notify(&self, message: &Message) {
        if message.status() == ProcessingStatus::Failed {
            for observer in &self.observers {
                observer.on_failure(message);
            }
        }
    }
}

/// Builder for [`EventPipeline`].
pub struct EventPipelineBuilder {
    registry: Arc<HandlerRegistry>,
    services: Option<ServiceProvider>,
    middlewares: Vec<Arc<dyn Middleware>>,
    observers: Vec<Arc<dyn FailureObserver>>,
    rethrow_failures: bool,
    include_execution_duration: bool,
}

impl EventPipelineBuilder {
    /// Set the provider handed to every middleware.
    pub fn services(mut self, services: ServiceProvider) -> Self {
        self.services = Some(services);
        self
    }

    /// Insert a custom middleware between the resolver and the executor.
    /// Middleware run in insertion order.
    pub fn use_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Register a failure observer.
    pub fn observer<O: FailureObserver + 'static>(mut self, observer: O) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Opt into re-raising recorded failures to the raiser, command-style.
    /// Default is `false`: raising is fire-and-forget.
    pub fn rethrow_failures(mut self, rethrow: bool) -> Self {
        self.rethrow_failures = rethrow;
        self
    }

    /// Whether the executor records handler invocation time.
    /// Default is `true`.
    pub fn include_execution_duration(mut self, include: bool) -> Self {
        self.include_execution_duration = include;
        self
    }

    pub fn build(self) -> EventPipeline {
        let mut builder = MessagePipeline::builder()
            .accept(MessageKind::Event)
            .services(self.services.unwrap_or_default())
            .rethrow_failures(self.rethrow_failures)
            .use_middleware(HandlerLocatorMiddleware::new(self.registry).throw_on_missing(false))
            .use_middleware(HandlerResolverMiddleware::new());
        for middleware in self.middlewares {
            builder = builder.use_middleware_arc(middleware);
        }
        let inner = builder
            .use_middleware(
                HandlerExecutorMiddleware::new()
                    .include_execution_duration(self.include_execution_duration),
            )
            .build();

        EventPipeline {
            inner,
            observers: self.observers,
        }
    }
}

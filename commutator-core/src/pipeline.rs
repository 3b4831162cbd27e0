//! Message pipeline driver.

use crate::container::ServiceProvider;
use crate::error::DispatchError;
use crate::executor::HandlerExecutorMiddleware;
use crate::handler::Query;
use crate::locator::HandlerLocatorMiddleware;
use crate::logging::{debug, trace, warn};
use crate::message::{Message, MessageKind, ProcessingStatus, item_keys};
use crate::middleware::Middleware;
use crate::registry::HandlerRegistry;
use crate::resolver::HandlerResolverMiddleware;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Ordered middleware chain plus the driver loop that feeds a message
/// through it.
///
/// The driver runs middleware strictly in configured order, for every
/// message, with no reordering or fan-out. After the chain completes, a
/// failure recorded on the message is re-raised with its original identity
/// preserved (see [`DispatchFailure`](crate::DispatchFailure)) unless the
/// pipeline was built with `rethrow_failures(false)`, in which case the
/// failure stays attached to the message for the caller to inspect.
///
/// # Examples
///
/// ```rust,ignore
/// let registry = HandlerRegistry::builder()
///     .command::<CreateOrder, CreateOrderHandler>()
///     .build();
/// let pipeline = MessagePipeline::for_commands(registry, ServiceProvider::new());
///
/// let order = pipeline.handle_command(CreateOrder::new("sku-1"))?;
/// ```
pub struct MessagePipeline {
    accepted_kinds: Vec<MessageKind>,
    middlewares: Vec<Arc<dyn Middleware>>,
    services: ServiceProvider,
    rethrow_failures: bool,
}

impl MessagePipeline {
    /// Start building a pipeline with an explicit middleware chain.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// A command pipeline with the default locator, resolver, executor
    /// chain.
    pub fn for_commands(registry: Arc<HandlerRegistry>, services: ServiceProvider) -> Self {
        Self::default_chain(MessageKind::Command, registry, services)
    }

    /// A query pipeline with the default locator, resolver, executor
    /// chain.
    pub fn for_queries(registry: Arc<HandlerRegistry>, services: ServiceProvider) -> Self {
        Self::default_chain(MessageKind::Query, registry, services)
    }

    fn default_chain(
        kind: MessageKind,
        registry: Arc<HandlerRegistry>,
        services: ServiceProvider,
    ) -> Self {
        Self::builder()
            .accept(kind)
            .services(services)
            .use_middleware(HandlerLocatorMiddleware::new(registry))
            .use_middleware(HandlerResolverMiddleware::new())
            .use_middleware(HandlerExecutorMiddleware::new())
            .build()
    }

    /// The provider handed to every middleware.
    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    /// Run a message through the middleware chain synchronously.
    ///
    /// The message is borrowed mutably, so its status, failure, duration,
    /// and report stay observable to the caller whether or not an error is
    /// returned.
    pub fn dispatch(&self, message: &mut Message) -> Result<(), DispatchError> {
        self.admit(message)?;
        for middleware in &self.middlewares {
            trace!(middleware = middleware.id(), message_id = %message.id(), "running middleware");
            middleware.handle(message, &self.services)?;
        }
        self.finish(message)
    }

    /// Run a message through the middleware chain asynchronously.
    ///
    /// The cancellation token is observed by the executor before handler
    /// invocation begins; the pipeline introduces no suspension points of
    /// its own.
    pub async fn dispatch_async(
        &self,
        message: &mut Message,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        self.admit(message)?;
        for middleware in &self.middlewares {
            trace!(middleware = middleware.id(), message_id = %message.id(), "running middleware");
            middleware.handle_async(message, &self.services, cancel).await?;
        }
        self.finish(message)
    }

    /// Dispatch a command and hand the (possibly mutated) command back.
    ///
    /// Command handlers receive the payload mutably and may write results
    /// onto it. This entry point always surfaces a recorded failure, even
    /// when the pipeline itself was configured not to rethrow; callers who
    /// want to inspect a failed message instead should use
    /// [`dispatch`](Self::dispatch) directly.
    pub fn handle_command<C: Send + 'static>(&self, command: C) -> Result<C, DispatchError> {
        let mut message = Message::command(command);
        self.dispatch(&mut message)?;
        Self::unwrap_command(message)
    }

    /// Asynchronous counterpart of [`handle_command`](Self::handle_command).
    pub async fn handle_command_async<C: Send + 'static>(
        &self,
        command: C,
        cancel: &CancellationToken,
    ) -> Result<C, DispatchError> {
        let mut message = Message::command(command);
        self.dispatch_async(&mut message, cancel).await?;
        Self::unwrap_command(message)
    }

    /// Dispatch a query and return its handler's result.
    pub fn execute_query<Q: Query>(&self, query: Q) -> Result<Q::Output, DispatchError> {
        let mut message = Message::query(query);
        self.dispatch(&mut message)?;
        Self::unwrap_query_result::<Q>(message)
    }

    /// Asynchronous counterpart of [`execute_query`](Self::execute_query).
    pub async fn execute_query_async<Q: Query>(
        &self,
        query: Q,
        cancel: &CancellationToken,
    ) -> Result<Q::Output, DispatchError> {
        let mut message = Message::query(query);
        self.dispatch_async(&mut message, cancel).await?;
        Self::unwrap_query_result::<Q>(message)
    }

    fn admit(&self, message: &mut Message) -> Result<(), DispatchError> {
        if !self.accepts(message.kind()) {
            return Err(DispatchError::KindNotAccepted(message.kind()));
        }
        if message.status() != ProcessingStatus::NotInitialized {
            return Err(DispatchError::InvalidPipelineState(format!(
                "message `{}` has already been dispatched",
                message.id()
            )));
        }
        message.set_status(ProcessingStatus::Processing);
        debug!(
            message_id = %message.id(),
            payload = message.content_type_name(),
            kind = ?message.kind(),
            "dispatching message"
        );
        Ok(())
    }

    fn finish(&self, message: &Message) -> Result<(), DispatchError> {
        if let Some(failure) = message.failure() {
            warn!(message_id = %message.id(), error = %failure, "dispatch failed");
            if self.rethrow_failures {
                return Err(failure.reraise());
            }
        }
        Ok(())
    }

    fn accepts(&self, kind: MessageKind) -> bool {
        self.accepted_kinds.is_empty() || self.accepted_kinds.contains(&kind)
    }

    fn unwrap_command<C: Send + 'static>(mut message: Message) -> Result<C, DispatchError> {
        if let Some(failure) = message.failure() {
            return Err(failure.reraise());
        }
        let payload_type = message.content_type_name();
        message.into_content::<C>().ok_or_else(|| {
            DispatchError::InvalidPipelineState(format!(
                "command payload `{payload_type}` could not be recovered from its envelope"
            ))
        })
    }

    fn unwrap_query_result<Q: Query>(mut message: Message) -> Result<Q::Output, DispatchError> {
        if let Some(failure) = message.failure() {
            return Err(failure.reraise());
        }
        let payload_type = message.content_type_name();
        message
            .take_item::<Q::Output>(item_keys::QUERY_RESULT)
            .ok_or_else(|| {
                DispatchError::InvalidPipelineState(format!(
                    "query `{payload_type}` completed without producing a result"
                ))
            })
    }
}

/// Builder for [`MessagePipeline`].
///
/// A pipeline built without any [`accept`](Self::accept) call takes all
/// message kinds; call `accept` one or more times to narrow it.
pub struct PipelineBuilder {
    accepted_kinds: Vec<MessageKind>,
    middlewares: Vec<Arc<dyn Middleware>>,
    services: Option<ServiceProvider>,
    rethrow_failures: bool,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            accepted_kinds: Vec::new(),
            middlewares: Vec::new(),
            services: None,
            rethrow_failures: true,
        }
    }

    /// Accept a message kind. May be called multiple times.
    pub fn accept(mut self, kind: MessageKind) -> Self {
        if !self.accepted_kinds.contains(&kind) {
            self.accepted_kinds.push(kind);
        }
        self
    }

    /// Append a middleware to the chain. Middleware run in insertion order.
    pub fn use_middleware<M: Middleware + 'static>(self, middleware: M) -> Self {
        self.use_middleware_arc(Arc::new(middleware))
    }

    /// Append an already shared middleware to the chain.
    pub fn use_middleware_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Set the provider handed to every middleware.
    pub fn services(mut self, services: ServiceProvider) -> Self {
        self.services = Some(services);
        self
    }

    /// Whether a failure recorded on the message is re-raised by the
    /// driver after the chain completes. Default is `true`.
    pub fn rethrow_failures(mut self, rethrow: bool) -> Self {
        self.rethrow_failures = rethrow;
        self
    }

    pub fn build(self) -> MessagePipeline {
        MessagePipeline {
            accepted_kinds: self.accepted_kinds,
            middlewares: self.middlewares,
            services: self.services.unwrap_or_default(),
            rethrow_failures: self.rethrow_failures,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

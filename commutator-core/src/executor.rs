//! Handler executor middleware.

use crate::container::ServiceProvider;
use crate::error::DispatchError;
use crate::failure::DispatchFailure;
use crate::logging::warn;
use crate::message::{Message, ProcessingStatus, item_keys};
use crate::middleware::Middleware;
use crate::registry::{HandlerBinding, HandlerEntry, InvokeError, InvokeOutcome};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Invokes the located handler against the payload and records the outcome.
///
/// Rejected messages are never executed. A missing handler entry or missing
/// resolved instance is a configuration fault, reported as
/// [`DispatchError::InvalidPipelineState`] rather than captured as a payload
/// failure. A failing handler moves the message to `Failed` with the
/// original error captured into a [`DispatchFailure`]; the pipeline driver
/// decides whether to re-raise it.
///
/// The synchronous and asynchronous entry points intentionally do not share
/// a body: routing every synchronous dispatch through the async machinery
/// measurably slows the sync path down.
pub struct HandlerExecutorMiddleware {
    include_execution_duration: bool,
}

impl HandlerExecutorMiddleware {
    pub fn new() -> Self {
        Self {
            include_execution_duration: true,
        }
    }

    /// Whether to record handler invocation time on the message.
    /// Default is `true`.
    pub fn include_execution_duration(mut self, include: bool) -> Self {
        self.include_execution_duration = include;
        self
    }

    fn located_handler(&self, message: &Message) -> Result<Arc<HandlerEntry>, DispatchError> {
        message.handler().cloned().ok_or_else(|| {
            DispatchError::InvalidPipelineState(format!(
                "no handler was located for `{}`; run the locator middleware before the executor",
                message.content_type_name()
            ))
        })
    }

    fn resolved_instance(
        &self,
        message: &Message,
        entry: &HandlerEntry,
    ) -> Result<Option<Arc<dyn Any + Send + Sync>>, DispatchError> {
        match entry.binding() {
            HandlerBinding::SelfHandled => Ok(None),
            HandlerBinding::Registered { .. } => message
                .item::<Arc<dyn Any + Send + Sync>>(item_keys::HANDLER_INSTANCE)
                .cloned()
                .map(Some)
                .ok_or_else(|| {
                    DispatchError::InvalidPipelineState(format!(
                        "no handler instance was resolved for `{}`; run the resolver middleware before the executor",
                        message.content_type_name()
                    ))
                }),
        }
    }

    fn record(
        &self,
        message: &mut Message,
        entry: &HandlerEntry,
        started: Option<Instant>,
        outcome: InvokeOutcome,
    ) -> Result<(), DispatchError> {
        // Duration covers the invocation only, success or failure alike.
        if let Some(started) = started {
            message.set_execution_duration(started.elapsed());
        }

        match outcome {
            Ok(result) => {
                if let Some(value) = result {
                    message.set_boxed_item(item_keys::QUERY_RESULT, value);
                }
                message.set_status(ProcessingStatus::Completed);
                Ok(())
            }
            Err(InvokeError::Fault(fault)) => {
                let failure =
                    DispatchFailure::handler(fault, entry.payload_type(), entry.handler_type());
                warn!(
                    payload = entry.payload_type(),
                    handler = entry.handler_type(),
                    error = %failure,
                    "handler failed"
                );
                message.fail(failure);
                Ok(())
            }
            Err(InvokeError::RequiresAsync) => Err(DispatchError::InvalidPipelineState(format!(
                "handler `{}` for `{}` is asynchronous; dispatch the message through `dispatch_async`",
                entry.handler_type(),
                entry.payload_type()
            ))),
            Err(InvokeError::PayloadTypeMismatch { expected }) => {
                Err(DispatchError::InvalidPipelineState(format!(
                    "payload does not match the registered handler; expected `{expected}`"
                )))
            }
            Err(InvokeError::HandlerTypeMismatch { expected }) => {
                Err(DispatchError::InvalidPipelineState(format!(
                    "resolved handler instance is not a `{expected}`"
                )))
            }
        }
    }
}

impl Default for HandlerExecutorMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for HandlerExecutorMiddleware {
    fn id(&self) -> &str {
        "handler-executor"
    }

    fn handle(
        &self,
        message: &mut Message,
        services: &ServiceProvider,
    ) -> Result<(), DispatchError> {
        // Rejected messages are never executed.
        if message.status() == ProcessingStatus::Rejected {
            return Ok(());
        }
        let entry = self.located_handler(message)?;
        let instance = self.resolved_instance(message, &entry)?;

        let started = self.include_execution_duration.then(Instant::now);
        let outcome = entry
            .invoker()
            .invoke(instance.as_deref(), message.content_mut_any(), services);
        self.record(message, &entry, started, outcome)
    }

    async fn handle_async(
        &self,
        message: &mut Message,
        services: &ServiceProvider,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        // Rejected messages are never executed.
        if message.status() == ProcessingStatus::Rejected {
            return Ok(());
        }
        let entry = self.located_handler(message)?;
        let instance = self.resolved_instance(message, &entry)?;

        // Fail fast when cancellation was requested before invocation.
        // Once the handler is running, cancellation is its own concern.
        if cancel.is_cancelled() {
            message.fail(DispatchFailure::cancelled(
                entry.payload_type(),
                entry.handler_type(),
            ));
            return Ok(());
        }

        let started = self.include_execution_duration.then(Instant::now);
        let outcome = entry
            .invoker()
            .invoke_async(instance.as_deref(), message.content_mut_any(), services)
            .await;
        self.record(message, &entry, started, outcome)
    }
}

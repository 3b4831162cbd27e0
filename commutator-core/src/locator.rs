//! Handler locator middleware.

use crate::container::ServiceProvider;
use crate::error::DispatchError;
use crate::logging::{debug, trace};
use crate::message::{Message, ProcessingStatus};
use crate::middleware::Middleware;
use crate::registry::HandlerRegistry;
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves which handler applies to a payload.
///
/// Looks the payload's runtime type up in the immutable
/// [`HandlerRegistry`], by exact `TypeId` and message kind, and stores the
/// matching entry on the message for the resolver and executor to consume.
/// A payload with no registered handler marks the message `Rejected`; by
/// default that is also reported as a [`DispatchError::HandlerNotFound`]
/// configuration fault, which event pipelines turn off to keep `raise`
/// fire-and-forget.
pub struct HandlerLocatorMiddleware {
    registry: Arc<HandlerRegistry>,
    throw_on_missing: bool,
}

impl HandlerLocatorMiddleware {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            throw_on_missing: true,
        }
    }

    /// Whether a missing handler is reported as an error in addition to
    /// rejecting the message. Default is `true`.
    pub fn throw_on_missing(mut self, throw_on_missing: bool) -> Self {
        self.throw_on_missing = throw_on_missing;
        self
    }
}

#[async_trait]
impl Middleware for HandlerLocatorMiddleware {
    fn id(&self) -> &str {
        "handler-locator"
    }

    fn handle(
        &self,
        message: &mut Message,
        _services: &ServiceProvider,
    ) -> Result<(), DispatchError> {
        match self.registry.find(message.content_type(), message.kind()) {
            Some(entry) => {
                trace!(
                    payload = message.content_type_name(),
                    handler = entry.handler_type(),
                    self_handled = entry.is_self_handled(),
                    "handler located"
                );
                message.set_handler(entry);
                Ok(())
            }
            None => {
                debug!(
                    payload = message.content_type_name(),
                    kind = ?message.kind(),
                    "no handler registered"
                );
                message.set_status(ProcessingStatus::Rejected);
                if self.throw_on_missing {
                    Err(DispatchError::HandlerNotFound(message.content_type_name()))
                } else {
                    Ok(())
                }
            }
        }
    }
}

//! Handler resolver middleware.

use crate::container::ServiceProvider;
use crate::error::DispatchError;
use crate::logging::trace;
use crate::message::{Message, ProcessingStatus, item_keys};
use crate::middleware::Middleware;
use crate::registry::HandlerBinding;
use async_trait::async_trait;

/// Obtains a live handler instance for the located entry.
///
/// Prefers an instance registered in the [`ServiceProvider`] (so handlers
/// can be wired with dependencies at startup) and falls back to the entry's
/// direct-construction factory. The instance is stored in the message items
/// under [`item_keys::HANDLER_INSTANCE`] for the executor to read. The
/// resolver never invokes the handler; a missing instance is reported by
/// the executor, not here.
pub struct HandlerResolverMiddleware;

impl HandlerResolverMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HandlerResolverMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for HandlerResolverMiddleware {
    fn id(&self) -> &str {
        "handler-resolver"
    }

    fn handle(
        &self,
        message: &mut Message,
        services: &ServiceProvider,
    ) -> Result<(), DispatchError> {
        if message.status() == ProcessingStatus::Rejected {
            return Ok(());
        }
        let Some(entry) = message.handler().cloned() else {
            return Ok(());
        };

        match entry.binding() {
            HandlerBinding::SelfHandled => {}
            HandlerBinding::Registered {
                handler_type_id,
                factory,
            } => {
                let instance = services
                    .resolve_by_id(*handler_type_id)
                    .unwrap_or_else(|| factory());
                trace!(handler = entry.handler_type(), "handler instance resolved");
                message.set_item(item_keys::HANDLER_INSTANCE, instance);
            }
        }
        Ok(())
    }
}

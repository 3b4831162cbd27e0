//! Handler traits.
//!
//! A handler is any value offering an "invoke the payload" capability. The
//! pipeline never inspects handler types at dispatch time; which concrete
//! operation runs is decided by a registry lookup keyed by payload type
//! (see [`HandlerRegistry`](crate::HandlerRegistry)).
//!
//! Every trait carries an associated `Error` type so a failing handler
//! surfaces its own domain error, not a generic wrapper. Synchronous and
//! asynchronous traits are kept separate: the synchronous dispatch path
//! never pays for async machinery.

use crate::container::ServiceProvider;
use async_trait::async_trait;

/// A query payload, declaring the result type its handler produces.
pub trait Query: Send + 'static {
    /// Value the query handler returns to the caller.
    type Output: Send + 'static;
}

/// Synchronous handler for a command or event payload.
///
/// The payload is passed mutably so command handlers can write results back
/// onto the command for the dispatching caller to read.
pub trait Handler<M>: Send + Sync
where
    M: Send + 'static,
{
    type Error: std::error::Error + Send + Sync + 'static;

    fn handle(&self, payload: &mut M, services: &ServiceProvider) -> Result<(), Self::Error>;
}

/// Asynchronous handler for a command or event payload.
///
/// Cancellation is only checked by the executor before invocation begins;
/// once the handler is running, observing cancellation is the handler's own
/// responsibility.
#[async_trait]
pub trait AsyncHandler<M>: Send + Sync
where
    M: Send + 'static,
{
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&self, payload: &mut M, services: &ServiceProvider)
    -> Result<(), Self::Error>;
}

/// Synchronous handler for a query payload.
pub trait QueryHandler<Q: Query>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn handle(&self, query: &Q, services: &ServiceProvider) -> Result<Q::Output, Self::Error>;
}

/// Asynchronous handler for a query payload.
#[async_trait]
pub trait AsyncQueryHandler<Q: Query>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&self, query: &Q, services: &ServiceProvider)
    -> Result<Q::Output, Self::Error>;
}

/// A payload that is its own handler.
///
/// Simple messages can carry their handling operation on the payload type
/// itself, avoiding a second allocation and a registry entry for a separate
/// handler type. Register such payloads with
/// [`HandlerRegistryBuilder::self_handled_command`](crate::HandlerRegistryBuilder::self_handled_command).
pub trait SelfHandling: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn handle(&mut self, services: &ServiceProvider) -> Result<(), Self::Error>;
}

/// Asynchronous counterpart of [`SelfHandling`].
#[async_trait]
pub trait SelfHandlingAsync: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&mut self, services: &ServiceProvider) -> Result<(), Self::Error>;
}

//! In-process message dispatch core for commutator.
//!
//! Routes command, query, and event messages to application-supplied
//! handlers through an ordered chain of middleware, recording status,
//! timing, and failures on a per-dispatch [`Message`] envelope.
//!
//! ## Features
//!
//! - **Pipelines** - ordered, pluggable middleware chains with sync and
//!   async dispatch
//! - **Handler registry** - immutable payload-type to handler mapping built
//!   once at startup
//! - **Dependency provider** - handlers resolved from a container or built
//!   directly
//! - **Failure capture** - the original handler error survives dispatch and
//!   can be re-raised or type-tested
//! - **Observability** - per-message status, duration, and failure reports;
//!   structured `tracing` events throughout
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use commutator_core::*;
//! use std::convert::Infallible;
//!
//! struct CreateUser {
//!     email: String,
//!     id: Option<u64>,
//! }
//!
//! #[derive(Default)]
//! struct CreateUserHandler;
//!
//! impl Handler<CreateUser> for CreateUserHandler {
//!     type Error = Infallible;
//!
//!     fn handle(&self, cmd: &mut CreateUser, _services: &ServiceProvider) -> Result<(), Infallible> {
//!         cmd.id = Some(42);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), DispatchError> {
//!     let registry = HandlerRegistry::builder()
//!         .command::<CreateUser, CreateUserHandler>()
//!         .build();
//!     let pipeline = MessagePipeline::for_commands(registry, ServiceProvider::new());
//!
//!     let cmd = pipeline.handle_command(CreateUser {
//!         email: "alice@example.com".into(),
//!         id: None,
//!     })?;
//!     assert_eq!(cmd.id, Some(42));
//!     Ok(())
//! }
//! ```

pub mod container;
pub mod error;
pub mod executor;
pub mod failure;
pub mod handler;
pub mod locator;
pub mod logging;
pub mod message;
pub mod middleware;
pub mod pipeline;
pub mod registry;
pub mod resolver;

pub use container::{Provider, ServiceProvider};
pub use error::DispatchError;
pub use executor::HandlerExecutorMiddleware;
pub use failure::{DispatchFailure, FailureKind};
pub use handler::{
    AsyncHandler, AsyncQueryHandler, Handler, Query, QueryHandler, SelfHandling, SelfHandlingAsync,
};
pub use locator::HandlerLocatorMiddleware;
pub use message::{
    DispatchReport, FailureReport, Message, MessageKind, ProcessingStatus, item_keys,
};
pub use middleware::Middleware;
pub use pipeline::{MessagePipeline, PipelineBuilder};
pub use registry::{HandlerEntry, HandlerModule, HandlerRegistry, HandlerRegistryBuilder};
pub use resolver::HandlerResolverMiddleware;

// Re-export the cancellation token used by the async dispatch path so
// callers do not need a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;

//! Fire-and-forget event dispatch for commutator.
//!
//! Events are notifications. This crate specializes the commutator message
//! pipeline for them: the [`EventPipeline`] accepts only event-kind
//! messages, exposes a `raise` entry point instead of request/response
//! dispatch, and never interrupts the raiser on handler failure unless a
//! deployment explicitly opts in. Failures are recorded on the raised
//! message and forwarded to [`FailureObserver`]s.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use commutator_core::*;
//! use commutator_events::*;
//! use std::convert::Infallible;
//!
//! struct UserSignedUp {
//!     username: String,
//! }
//!
//! #[derive(Default)]
//! struct WelcomeEmailHandler;
//!
//! impl Handler<UserSignedUp> for WelcomeEmailHandler {
//!     type Error = Infallible;
//!
//!     fn handle(&self, event: &mut UserSignedUp, _services: &ServiceProvider) -> Result<(), Infallible> {
//!         println!("sending welcome email to {}", event.username);
//!         Ok(())
//!     }
//! }
//!
//! let registry = HandlerRegistry::builder()
//!     .event::<UserSignedUp, WelcomeEmailHandler>()
//!     .build();
//! let events = EventPipeline::new(registry, ServiceProvider::new());
//!
//! // The raiser is never interrupted, even if the handler fails.
//! let message = events.raise(UserSignedUp { username: "alice".into() }).unwrap();
//! assert_eq!(message.status(), ProcessingStatus::Completed);
//! ```

pub mod observer;
pub mod pipeline;
pub mod raw;

pub use observer::{FailureObserver, TracingFailureObserver};
pub use pipeline::{EventPipeline, EventPipelineBuilder};
pub use raw::RawMessage;

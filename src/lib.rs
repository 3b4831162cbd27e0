// Commutator - an in-process message dispatch engine for Rust
//
// Routes command, query, and event messages through ordered middleware
// pipelines to registered handlers, with per-message status tracking,
// timing, and failure capture that preserves the original error identity.

// Re-export core functionality
pub use commutator_core::*;

// Re-export the event pipeline specialization
pub use commutator_events as events;

// Re-export optional crates
#[cfg(feature = "testing")]
pub use commutator_testing as testing;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        AsyncHandler,
        AsyncQueryHandler,
        CancellationToken,
        DispatchError,
        DispatchFailure,
        FailureKind,
        Handler,
        HandlerModule,
        HandlerRegistry,
        Message,
        MessageKind,
        MessagePipeline,
        Middleware,
        ProcessingStatus,
        Provider,
        Query,
        QueryHandler,
        SelfHandling,
        SelfHandlingAsync,
        ServiceProvider,
    };
    pub use commutator_events::{EventPipeline, FailureObserver, RawMessage};
}

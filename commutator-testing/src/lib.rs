//! Testing utilities for commutator pipelines.
//!
//! Counting and failing stub handlers plus a recording failure observer,
//! for asserting how a pipeline treated a message: how many times a handler
//! ran, which error identity a failure carries, and what observers saw.

pub mod observer;
pub mod stubs;

pub use observer::RecordingObserver;
pub use stubs::{
    CountingAsyncHandler, CountingHandler, FailingAsyncHandler, FailingHandler, StubFailure,
};

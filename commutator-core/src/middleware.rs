//! Middleware abstraction for the dispatch pipeline.

use crate::container::ServiceProvider;
use crate::error::DispatchError;
use crate::message::Message;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// One ordered step in a dispatch pipeline, with a single cross-cutting
/// responsibility.
///
/// Middleware mutate the message in place. Returning an error reports a
/// configuration fault and aborts the dispatch immediately; handler faults
/// are never returned here but recorded on the message by the executor.
///
/// The async entry point defaults to running the synchronous body inline,
/// so middleware that never suspend implement only [`handle`](Middleware::handle)
/// and work on both paths.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Identifier used in log output.
    fn id(&self) -> &str;

    /// Process the message on the synchronous dispatch path.
    fn handle(&self, message: &mut Message, services: &ServiceProvider)
    -> Result<(), DispatchError>;

    /// Process the message on the asynchronous dispatch path.
    async fn handle_async(
        &self,
        message: &mut Message,
        services: &ServiceProvider,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let _ = cancel;
        self.handle(message, services)
    }
}

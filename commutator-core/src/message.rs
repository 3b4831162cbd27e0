//! Message envelope and processing state machine.
//!
//! A [`Message`] wraps one payload for the lifetime of one dispatch. The
//! pipeline records everything it learns about the dispatch on the envelope:
//! the located handler, the terminal status, the captured failure, and the
//! handler execution time. Middleware exchange ad-hoc context through the
//! open `items` map using namespaced string keys.

use crate::failure::{DispatchFailure, FailureKind};
use crate::registry::HandlerEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Discriminates the three message categories a pipeline can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Command,
    Query,
    Event,
}

/// Processing state of a message within one dispatch.
///
/// Transitions are monotonic: `NotInitialized` to `Processing` on dispatch
/// entry, then exactly one of `Completed`, `Rejected`, or `Failed`. Once a
/// terminal state is reached no further transition is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    NotInitialized,
    Processing,
    Completed,
    Rejected,
    Failed,
}

impl ProcessingStatus {
    /// Whether this status ends the dispatch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Failed)
    }
}

/// Well-known `items` keys. Keys are namespaced by the middleware that owns
/// them so independent middleware cannot collide.
pub mod item_keys {
    /// Resolved handler instance, written by the resolver middleware.
    pub const HANDLER_INSTANCE: &str = "resolver.handler-instance";

    /// Query result value, written by the executor middleware.
    pub const QUERY_RESULT: &str = "executor.query-result";
}

/// Mutable envelope carrying a payload through one pipeline run.
///
/// The envelope is exclusively owned by a single dispatch invocation; no two
/// concurrent dispatches ever share one.
pub struct Message {
    id: Uuid,
    created_at: DateTime<Utc>,
    kind: MessageKind,
    status: ProcessingStatus,
    content: Box<dyn Any + Send>,
    content_type: TypeId,
    content_type_name: &'static str,
    handler: Option<Arc<HandlerEntry>>,
    failure: Option<DispatchFailure>,
    execution_duration: Option<Duration>,
    items: HashMap<String, Box<dyn Any + Send>>,
}

impl Message {
    /// Wrap a payload in a new envelope of the given kind.
    pub fn new<P: Send + 'static>(kind: MessageKind, payload: P) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            kind,
            status: ProcessingStatus::NotInitialized,
            content: Box::new(payload),
            content_type: TypeId::of::<P>(),
            content_type_name: std::any::type_name::<P>(),
            handler: None,
            failure: None,
            execution_duration: None,
            items: HashMap::new(),
        }
    }

    /// Wrap a command payload.
    pub fn command<P: Send + 'static>(payload: P) -> Self {
        Self::new(MessageKind::Command, payload)
    }

    /// Wrap a query payload.
    pub fn query<P: Send + 'static>(payload: P) -> Self {
        Self::new(MessageKind::Query, payload)
    }

    /// Wrap an event payload.
    pub fn event<P: Send + 'static>(payload: P) -> Self {
        Self::new(MessageKind::Event, payload)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    /// `TypeId` of the wrapped payload.
    pub fn content_type(&self) -> TypeId {
        self.content_type
    }

    /// Type name of the wrapped payload.
    pub fn content_type_name(&self) -> &'static str {
        self.content_type_name
    }

    /// Advance the processing status. Terminal states are sticky: once the
    /// message is `Completed`, `Rejected`, or `Failed`, further transitions
    /// are ignored.
    pub fn set_status(&mut self, status: ProcessingStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
    }

    /// Record a failure, moving the message to `Failed`. Keeps the
    /// invariant that a failure is present if and only if the status is
    /// `Failed`. Ignored if the message already reached a terminal state.
    pub fn fail(&mut self, failure: DispatchFailure) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ProcessingStatus::Failed;
        self.failure = Some(failure);
    }

    /// Borrow the payload as its concrete type.
    pub fn content_ref<P: 'static>(&self) -> Option<&P> {
        self.content.downcast_ref::<P>()
    }

    /// Mutably borrow the payload as its concrete type.
    pub fn content_mut<P: 'static>(&mut self) -> Option<&mut P> {
        self.content.downcast_mut::<P>()
    }

    /// Unwrap the envelope, recovering the payload.
    pub fn into_content<P: 'static>(self) -> Option<P> {
        self.content.downcast::<P>().ok().map(|payload| *payload)
    }

    pub(crate) fn content_mut_any(&mut self) -> &mut (dyn Any + Send) {
        self.content.as_mut()
    }

    /// The handler entry located for this message, if the locator ran.
    pub fn handler(&self) -> Option<&Arc<HandlerEntry>> {
        self.handler.as_ref()
    }

    pub(crate) fn set_handler(&mut self, entry: Arc<HandlerEntry>) {
        self.handler = Some(entry);
    }

    /// The captured failure; present if and only if the status is `Failed`.
    pub fn failure(&self) -> Option<&DispatchFailure> {
        self.failure.as_ref()
    }

    /// Wall-clock time spent inside the handler invocation, when duration
    /// tracking is enabled on the executor. Locator and resolver time is
    /// never included.
    pub fn execution_duration(&self) -> Option<Duration> {
        self.execution_duration
    }

    /// Execution duration in whole milliseconds.
    pub fn execution_duration_ms(&self) -> Option<u64> {
        self.execution_duration
            .map(|duration| duration.as_millis() as u64)
    }

    pub(crate) fn set_execution_duration(&mut self, duration: Duration) {
        self.execution_duration = Some(duration);
    }

    /// Store an ad-hoc context value under a namespaced key.
    pub fn set_item<T: Send + 'static>(&mut self, key: &str, value: T) {
        self.items.insert(key.to_string(), Box::new(value));
    }

    pub(crate) fn set_boxed_item(&mut self, key: &str, value: Box<dyn Any + Send>) {
        self.items.insert(key.to_string(), value);
    }

    /// Borrow a context value by key and type.
    pub fn item<T: 'static>(&self, key: &str) -> Option<&T> {
        self.items.get(key)?.downcast_ref::<T>()
    }

    /// Remove and return a context value by key and type.
    pub fn take_item<T: 'static>(&mut self, key: &str) -> Option<T> {
        self.items
            .remove(key)?
            .downcast::<T>()
            .ok()
            .map(|value| *value)
    }

    /// Keys currently present in the `items` map.
    pub fn item_keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Snapshot of the dispatch outcome for an external diagnostics
    /// collaborator. The pipeline itself never writes logs or metrics sinks;
    /// it only exposes this report.
    pub fn report(&self) -> DispatchReport {
        DispatchReport {
            id: self.id,
            created_at: self.created_at,
            kind: self.kind,
            status: self.status,
            payload_type: self.content_type_name,
            duration_ms: self.execution_duration_ms(),
            failure: self.failure.as_ref().map(|failure| FailureReport {
                kind: failure.kind(),
                handler_type: failure.handler_type(),
                message: failure.message().to_string(),
            }),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("payload_type", &self.content_type_name)
            .field("execution_duration", &self.execution_duration)
            .field("failure", &self.failure)
            .finish()
    }
}

/// Serializable dispatch outcome snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub kind: MessageKind,
    pub status: ProcessingStatus,
    pub payload_type: &'static str,
    pub duration_ms: Option<u64>,
    pub failure: Option<FailureReport>,
}

/// Failure summary inside a [`DispatchReport`].
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub handler_type: &'static str,
    pub message: String,
}

//! Serialized message envelope form.

use chrono::{DateTime, Utc};
use commutator_core::MessageKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A previously serialized message envelope, as produced by an external
/// store or transport.
///
/// Reconstituting live messages from this form is declared on the event
/// pipeline but not supported in this core; see
/// [`EventPipeline::process_raw`](crate::EventPipeline::process_raw).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: Uuid,
    pub kind: MessageKind,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub content: serde_json::Value,
}

//! The event wire envelope between `emit` and a handler.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{fresh_id, PropagationMeta};

/// The only schema version this crate emits or accepts. Consumers MUST
/// reject messages carrying any other value.
pub const EVENT_MESSAGE_VERSION: &str = "1";

/// One event emission, immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    /// Schema version; always [`EVENT_MESSAGE_VERSION`].
    pub version: String,
    /// Unique id for this emission, scoped to this process instance.
    pub event_id: String,
    /// Non-empty event name.
    pub event_name: String,
    /// Arbitrary payload.
    pub payload: Value,
    /// Propagation record; unknown keys preserved verbatim.
    pub meta: PropagationMeta,
    /// Request/response correlation id for this emission's subscription —
    /// distinct from `meta.correlation_id`, the request-level id from the
    /// original caller.
    pub correlation_id: String,
    /// Set when emitted from within a handler: the parent message's
    /// `correlation_id`.
    pub causation_id: Option<String>,
    /// Milliseconds since the epoch, at emission.
    pub timestamp: u64,
}

impl EventMessage {
    /// Construct a fresh message. `correlation_id` here is the emission's
    /// own subscription id, not a value taken from `meta`.
    pub fn new(
        event_name: impl Into<String>,
        payload: Value,
        meta: PropagationMeta,
        causation_id: Option<String>,
    ) -> Self {
        Self {
            version: EVENT_MESSAGE_VERSION.to_string(),
            event_id: fresh_id(),
            event_name: event_name.into(),
            payload,
            meta,
            correlation_id: fresh_id(),
            causation_id,
            timestamp: now_millis(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

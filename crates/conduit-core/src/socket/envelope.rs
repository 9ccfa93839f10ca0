//! WebSocket wire envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Close code used when a connection guard denies a connection.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Inbound client-to-server message.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    /// Route discriminator.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Opaque payload, validated against the route's schema if any.
    #[serde(default)]
    pub data: Option<Value>,
    /// Echoed back on the response when present.
    #[serde(rename = "correlationId", default)]
    pub correlation_id: Option<String>,
}

/// Outbound server-to-client message.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ServerMessage {
    /// A successful reply.
    pub fn ok(message_type: impl Into<String>, data: Value, correlation_id: Option<String>) -> Self {
        Self {
            message_type: message_type.into(),
            data: Some(data),
            error: None,
            correlation_id,
        }
    }

    /// An error reply; `data` is always `null`.
    pub fn error(message_type: impl Into<String>, error: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            message_type: message_type.into(),
            data: None,
            error: Some(error.into()),
            correlation_id,
        }
    }
}

//! Socket pipeline: connection-guard execution and per-message dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::{fresh_id, AmbientContext, PropagationMeta};
use crate::logging::Logger;
use crate::socket::envelope::{ClientMessage, ServerMessage};
use crate::socket::guard::ConnectionState;
use crate::socket::route::RoutingCoordinator;
use crate::validate::{PermissiveValidator, Validator};

/// Per-message (or synthetic per-connection) view handed to guards and
/// handlers.
pub struct SocketContext {
    /// The connection this message arrived on.
    pub socket_id: String,
    /// `"__connection__"` for the synthetic connection-guard pass.
    pub message_type: String,
    /// Inbound payload (`Value::Null` for the connection pass).
    pub data: Value,
    /// Echoed correlation id.
    pub correlation_id: String,
    /// Mutable state bag; guard mutations here are persisted on accept
    /// and visible to every later message handler on this connection.
    pub state: HashMap<String, Value>,
    /// Logger pre-bound with `{socketId, messageType}`.
    pub log: Arc<dyn Logger>,
    /// Propagation metadata adopted for this message.
    pub meta: PropagationMeta,
}

/// Runs the connection-guard and message-dispatch algorithms against a
/// shared [`RoutingCoordinator`].
pub struct SocketPipeline {
    coordinator: Arc<RoutingCoordinator>,
    validator: Arc<dyn Validator>,
    logger: Arc<dyn Logger>,
}

impl SocketPipeline {
    /// Build a pipeline over `coordinator`, validating schemas with
    /// `validator` (defaults to [`PermissiveValidator`] if `None`).
    pub fn new(coordinator: Arc<RoutingCoordinator>, validator: Option<Arc<dyn Validator>>) -> Self {
        Self {
            coordinator,
            validator: validator.unwrap_or_else(|| Arc::new(PermissiveValidator)),
            logger: crate::logging::from_meta("socket", PropagationMeta::default()),
        }
    }

    /// Run every connection guard in order against a synthetic context.
    /// `None` means reject — close with [`super::envelope::CLOSE_POLICY_VIOLATION`].
    pub async fn run_connection_guards(&self, socket_id: &str) -> Option<ConnectionState> {
        let mut ctx = SocketContext {
            socket_id: socket_id.to_string(),
            message_type: "__connection__".to_string(),
            data: Value::Null,
            correlation_id: fresh_id(),
            state: HashMap::new(),
            log: self.logger.clone(),
            meta: AmbientContext::current(),
        };
        for guard in self.coordinator.connection_guards() {
            match guard.can_activate(&mut ctx).await {
                Ok(true) => continue,
                Ok(false) | Err(_) => return None,
            }
        }
        Some(ConnectionState {
            state: ctx.state,
            initialized: true,
        })
    }

    /// Dispatch one inbound message. `None` means `message_type` matched no
    /// route: the caller should try a fallback handler, or drop silently.
    pub async fn handle_message(&self, socket_id: &str, message: ClientMessage) -> Option<ServerMessage> {
        let Some(connection) = self.coordinator.connection_state(socket_id) else {
            return Some(ServerMessage::error(
                message.message_type.clone(),
                "Connection not initialized",
                message.correlation_id.clone(),
            ));
        };
        if !connection.initialized {
            return Some(ServerMessage::error(
                message.message_type.clone(),
                "Connection not initialized",
                message.correlation_id.clone(),
            ));
        }

        let Some(route) = self.coordinator.route_for(&message.message_type) else {
            return None;
        };

        let correlation_id = message.correlation_id.clone().unwrap_or_else(fresh_id);
        let mut ctx = SocketContext {
            socket_id: socket_id.to_string(),
            message_type: message.message_type.clone(),
            data: message.data.clone().unwrap_or(Value::Null),
            correlation_id: correlation_id.clone(),
            state: connection.state.clone(),
            log: self.logger.with({
                let mut fields = std::collections::BTreeMap::new();
                fields.insert("socketId".to_string(), Value::String(socket_id.to_string()));
                fields.insert("messageType".to_string(), Value::String(message.message_type.clone()));
                fields
            }),
            meta: AmbientContext::current(),
        };

        for guard in &route.guards {
            match guard.can_activate(&mut ctx).await {
                Ok(true) => continue,
                Ok(false) | Err(_) => {
                    return Some(ServerMessage::error(route.message_type.clone(), "Forbidden", message.correlation_id.clone()));
                }
            }
        }

        if let Some(schema) = &route.schema {
            match self.validator.validate(schema, &ctx.data) {
                Ok(validated) => ctx.data = validated,
                Err(issues) => {
                    let details = issues.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                    return Some(ServerMessage::error(
                        route.message_type.clone(),
                        format!("Validation failed: {details}"),
                        message.correlation_id.clone(),
                    ));
                }
            }
        }

        match route.handler.handle(&ctx).await {
            Ok(value) => Some(ServerMessage::ok(route.message_type.clone(), value, message.correlation_id.clone())),
            Err(e) => {
                ctx.log.error(&format!(
                    "socket handler failed: correlationId={correlation_id} messageType={} socketId={socket_id} error={e}",
                    route.message_type
                ));
                Some(ServerMessage::error(route.message_type.clone(), e.to_string(), message.correlation_id.clone()))
            }
        }
    }
}

//! The context a handler receives for one event delivery.
//!
//! Fuses two conceptually separate layers — the delivery engine's raw
//! `chainedEmit` function and the richer `EventContext` with `ctx.log`/
//! `ctx.emit` a caller-facing system exposes — into a single concrete type.
//! Nothing is lost: every field either layer needs is present here, and
//! collapsing the two hand-offs avoids a second trait boundary with no
//! remaining purpose.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::context::{fresh_id, PropagationMeta};
use crate::event::message::EventMessage;
use crate::logging::Logger;
use crate::subscription::Subscription;

/// Options accepted by `emit` and by a handler's chained `ctx.emit`.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    /// Delay, in wall-clock time, before delivery is scheduled.
    pub delay: Option<Duration>,
    /// Explicit causation id override. Chained emits set this to the
    /// parent's `correlation_id` automatically; direct callers normally
    /// leave it `None`.
    pub causation_id: Option<String>,
    /// If set, the returned subscription settles with a timeout error if
    /// still pending after this duration.
    pub timeout: Option<Duration>,
    /// Idempotency key for duplicate suppression.
    pub idempotency_key: Option<String>,
}

/// The function backing `ctx.emit`: produces a child message whose `meta`
/// is inherited from the parent and whose `causationId` is the parent's
/// `correlationId`, by re-entering the owning provider's emit
/// path.
pub type ChainedEmit = Arc<dyn Fn(String, Value, EmitOptions) -> Subscription<Value> + Send + Sync>;

/// Per-delivery context passed to an [`crate::event::registry::EventHandler`].
pub struct EventContext {
    /// The delivered message's id.
    pub event_id: String,
    /// The delivered message's event name.
    pub event_name: String,
    /// The delivered message's payload.
    pub payload: Value,
    /// This emission's correlation id.
    pub correlation_id: String,
    /// Set if this message was itself a chained emission.
    pub causation_id: Option<String>,
    /// Propagation metadata inherited from the caller.
    pub meta: PropagationMeta,
    /// Logger pre-bound with `{eventName, eventId, correlationId}`.
    pub log: Arc<dyn Logger>,
    emit_chain: ChainedEmit,
}

impl EventContext {
    /// Build a context for a delivered `message`, bound to `emit_chain` for
    /// re-entrant chained emission.
    pub fn from_message(message: &EventMessage, log: Arc<dyn Logger>, emit_chain: ChainedEmit) -> Self {
        Self {
            event_id: message.event_id.clone(),
            event_name: message.event_name.clone(),
            payload: message.payload.clone(),
            correlation_id: message.correlation_id.clone(),
            causation_id: message.causation_id.clone(),
            meta: message.meta.clone(),
            log,
            emit_chain,
        }
    }

    /// Emit a chained event. `causationId` is automatically set to this
    /// context's `correlation_id`; `meta` is inherited.
    pub fn emit(&self, name: impl Into<String>, payload: Value) -> Subscription<Value> {
        self.emit_with_options(name, payload, EmitOptions::default())
    }

    /// Emit a chained event with explicit options. A caller-supplied
    /// `causation_id` is honored as-is; otherwise it defaults to this
    /// context's `correlation_id`.
    pub fn emit_with_options(&self, name: impl Into<String>, payload: Value, mut options: EmitOptions) -> Subscription<Value> {
        if options.causation_id.is_none() {
            options.causation_id = Some(self.correlation_id.clone());
        }
        (self.emit_chain)(name.into(), payload, options)
    }

    /// Build a standalone context with a no-op chained emit, for unit tests
    /// that only need a handler's view of `payload`/`meta`.
    #[cfg(test)]
    pub fn test_context(event_name: impl Into<String>, payload: Value, meta: PropagationMeta) -> Self {
        let log = crate::logging::from_meta("test", meta.clone());
        Self {
            event_id: fresh_id(),
            event_name: event_name.into(),
            payload,
            correlation_id: fresh_id(),
            causation_id: None,
            meta,
            log,
            emit_chain: Arc::new(|_name, _payload, _options| Subscription::new()),
        }
    }
}

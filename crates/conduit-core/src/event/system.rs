//! Event registry & system facade: the caller-facing entry point that
//! combines a known-event registry with a provider.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::context::{AmbientContext, PropagationMeta};
use crate::error::{ConduitError, ConduitResult};
use crate::event::context::EmitOptions;
use crate::event::provider::EventProvider;
use crate::event::registry::EventHandler;
use crate::subscription::Subscription;

/// Builds an immutable [`EventRegistry`].
#[derive(Default)]
pub struct EventRegistryBuilder {
    names: Vec<String>,
    seen: HashSet<String>,
}

impl EventRegistryBuilder {
    /// Start building an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event name. Re-registering the same name is a no-op.
    pub fn register(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if self.seen.insert(name.clone()) {
            self.names.push(name);
        }
        self
    }

    /// Freeze the registered name set.
    pub fn build(self) -> EventRegistry {
        EventRegistry {
            names: self.names,
            set: self.seen,
        }
    }
}

/// The frozen set of event names an [`EventSystem`] will accept.
pub struct EventRegistry {
    names: Vec<String>,
    set: HashSet<String>,
}

impl EventRegistry {
    /// Every registered name, in registration order.
    pub fn get_event_names(&self) -> &[String] {
        &self.names
    }

    /// `true` if `name` was registered.
    pub fn has_event(&self, name: &str) -> bool {
        self.set.contains(name)
    }
}

/// Binds a provider to a validated event-name set and captures ambient
/// propagation metadata on every `emit`.
pub struct EventSystem {
    registry: Arc<EventRegistry>,
    provider: Arc<dyn EventProvider>,
    default_meta: PropagationMeta,
}

impl EventSystem {
    /// Build a system over `registry` and `provider`. `default_meta` is
    /// merged under whatever the caller's ambient context supplies.
    pub fn new(registry: Arc<EventRegistry>, provider: Arc<dyn EventProvider>, default_meta: PropagationMeta) -> Self {
        Self {
            registry,
            provider,
            default_meta,
        }
    }

    /// Emit `name`. Rejects synchronously with `UnknownEvent` if `name`
    /// isn't in the registry, without touching the provider.
    pub fn emit(&self, name: &str, payload: Value, options: EmitOptions) -> Subscription<Value> {
        if !self.registry.has_event(name) {
            let sub = Subscription::new();
            sub.reject(ConduitError::UnknownEvent(name.to_string()));
            return sub;
        }
        let ambient = AmbientContext::current();
        let meta = self.default_meta.merged_with(&ambient);
        self.provider.emit(name, payload, meta, options)
    }

    /// Register `handler` for `name`. Rejects with `UnknownEvent` if `name`
    /// isn't in the registry; the provider is never touched in that case.
    pub async fn on_event(&self, name: &str, handler: Arc<dyn EventHandler>) -> ConduitResult<()> {
        if !self.registry.has_event(name) {
            return Err(ConduitError::UnknownEvent(name.to_string()));
        }
        self.provider.subscribe(name, handler).await
    }

    /// Start the underlying provider.
    pub async fn start(&self) -> ConduitResult<()> {
        self.provider.start().await
    }

    /// Stop the underlying provider.
    pub async fn stop(&self) -> ConduitResult<()> {
        self.provider.stop().await
    }
}

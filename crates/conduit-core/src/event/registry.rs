//! Handler registry: tracks which event names are known and which
//! handlers are subscribed to each.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ConduitResult;
use crate::event::context::EventContext;

/// Code invoked for one event delivery. An explicit trait object rather
/// than a duck-typed or reflection-based callback.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one delivery, returning the value that settles the
    /// subscription (if this is the first-registered handler for the
    /// event) or is otherwise discarded.
    async fn handle(&self, ctx: EventContext) -> ConduitResult<Value>;
}

struct FnEventHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnEventHandler<F>
where
    F: Fn(EventContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConduitResult<Value>> + Send + 'static,
{
    async fn handle(&self, ctx: EventContext) -> ConduitResult<Value> {
        (self.f)(ctx).await
    }
}

/// Wrap a closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(EventContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConduitResult<Value>> + Send + 'static,
{
    Arc::new(FnEventHandler { f })
}

/// Per event name, an ordered, append-only list of handlers. Registration
/// order is preserved; the first registered handler is the "responder".
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to `name`'s handler list.
    pub fn subscribe(&self, name: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().unwrap();
        handlers.entry(name.into()).or_default().push(handler);
    }

    /// An immutable snapshot of `name`'s handlers, in registration order.
    pub fn get_handlers(&self, name: &str) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of handlers registered for `name`.
    pub fn count(&self, name: &str) -> usize {
        self.handlers.read().unwrap().get(name).map_or(0, Vec::len)
    }

    /// Remove every registration.
    pub fn clear(&self) {
        self.handlers.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PropagationMeta;

    fn noop_ctx() -> EventContext {
        EventContext::test_context("x", Value::Null, PropagationMeta::default())
    }

    #[test]
    fn subscribe_preserves_registration_order() {
        let registry = HandlerRegistry::new();
        registry.subscribe("e", handler_fn(|_ctx| async { Ok(Value::from(1)) }));
        registry.subscribe("e", handler_fn(|_ctx| async { Ok(Value::from(2)) }));
        assert_eq!(registry.count("e"), 2);
        assert_eq!(registry.get_handlers("e").len(), 2);
    }

    #[tokio::test]
    async fn clear_removes_all_registrations() {
        let registry = HandlerRegistry::new();
        registry.subscribe("e", handler_fn(|_ctx| async { Ok(Value::Null) }));
        registry.clear();
        assert_eq!(registry.count("e"), 0);
        let handlers = registry.get_handlers("e");
        assert!(handlers.is_empty());
        let _ = noop_ctx();
    }
}

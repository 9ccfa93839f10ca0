//! Event delivery engine: routes one delivered message to its handlers.

use std::sync::Arc;

use crate::event::context::{ChainedEmit, EventContext};
use crate::event::message::EventMessage;
use crate::event::registry::EventHandler;
use crate::logging::Logger;
use crate::subscription::Subscription;

/// Routes one delivered message to its registered handlers.
pub struct DeliveryEngine;

impl DeliveryEngine {
    /// Schedule `handlers` to run against `message`, returning a
    /// subscription that settles with the first handler's outcome.
    ///
    /// - No handlers: the subscription stays pending forever (fire-and-
    ///   forget with no observer), since a caller who never awaits never
    ///   notices.
    /// - Otherwise: every handler is invoked concurrently. The first
    ///   registered handler's success/error settles the subscription. The
    ///   remaining handlers' errors are logged with
    ///   `{eventName, eventId, correlationId, causationId}` and otherwise
    ///   discarded.
    pub fn deliver(
        message: EventMessage,
        handlers: Vec<Arc<dyn EventHandler>>,
        logger: Arc<dyn Logger>,
        emit_chain: ChainedEmit,
    ) -> Subscription<serde_json::Value> {
        let subscription = Subscription::new();
        let mut iter = handlers.into_iter();
        let Some(first) = iter.next() else {
            return subscription;
        };

        let first_ctx = EventContext::from_message(&message, logger.clone(), emit_chain.clone());
        let first_subscription = subscription.clone();
        tokio::spawn(async move {
            match first.handle(first_ctx).await {
                Ok(value) => {
                    first_subscription.resolve(value);
                }
                Err(error) => {
                    first_subscription.reject(error);
                }
            }
        });

        for handler in iter {
            let ctx = EventContext::from_message(&message, logger.clone(), emit_chain.clone());
            let log = logger.clone();
            let event_name = message.event_name.clone();
            let event_id = message.event_id.clone();
            let correlation_id = message.correlation_id.clone();
            let causation_id = message.causation_id.clone();
            tokio::spawn(async move {
                if let Err(error) = handler.handle(ctx).await {
                    log.error(&format!(
                        "fire-and-forget handler failed: eventName={event_name} eventId={event_id} correlationId={correlation_id} causationId={causation_id:?} error={error}"
                    ));
                }
            });
        }

        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PropagationMeta;
    use crate::event::registry::handler_fn;
    use crate::error::ConduitError;
    use serde_json::Value;

    fn noop_emit_chain() -> ChainedEmit {
        Arc::new(|_name, _payload, _options| Subscription::new())
    }

    #[tokio::test]
    async fn no_handlers_leaves_subscription_pending() {
        let message = EventMessage::new("unused", Value::Null, PropagationMeta::default(), None);
        let logger = crate::logging::from_meta("event", PropagationMeta::default());
        let sub = DeliveryEngine::deliver(message, vec![], logger, noop_emit_chain());
        assert!(!sub.is_settled());
    }

    #[tokio::test]
    async fn first_handler_settles_subscription() {
        let message = EventMessage::new("double", Value::from(21), PropagationMeta::default(), None);
        let logger = crate::logging::from_meta("event", PropagationMeta::default());
        let handlers: Vec<Arc<dyn EventHandler>> = vec![handler_fn(|ctx| async move {
            Ok(Value::from(ctx.payload.as_i64().unwrap() * 2))
        })];
        let sub = DeliveryEngine::deliver(message, handlers, logger, noop_emit_chain());
        assert_eq!(sub.wait().await.unwrap(), Value::from(42));
    }

    #[tokio::test]
    async fn only_first_handler_result_settles_subscription() {
        let message = EventMessage::new("e", Value::Null, PropagationMeta::default(), None);
        let logger = crate::logging::from_meta("event", PropagationMeta::default());
        let handlers: Vec<Arc<dyn EventHandler>> = vec![
            handler_fn(|_ctx| async { Ok(Value::from("first")) }),
            handler_fn(|_ctx| async { Err(ConduitError::GuardDenied) }),
        ];
        let sub = DeliveryEngine::deliver(message, handlers, logger, noop_emit_chain());
        assert_eq!(sub.wait().await.unwrap(), Value::from("first"));
    }
}

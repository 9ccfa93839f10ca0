//! WebSocket fan-out provider: bridges a local WebSocket server with a
//! pub/sub broker so topic subscriptions and published messages cross
//! process instances.
//!
//! `start`/`stop` follow a `watch`-backed graceful lifecycle; the
//! subscribe retry policy follows the same exponential-backoff shape as
//! a general-purpose retry loop, with its own jitter formula
//! (`2^(n-1) * baseMs * (0.5 + uniform(0,1))`) implemented directly rather
//! than through a shared retry executor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::context::PropagationMeta;
use crate::error::{ConduitError, ConduitResult};
use crate::fanout::broker::{BrokerEvent, BrokerPublisher, BrokerSubscriber, FanoutPayload, LocalServer};
use crate::fanout::sanitize::sanitize_value;
use crate::fanout::state::{FanoutState, LocalSubscribeOutcome, LocalUnsubscribeOutcome};
use crate::fanout::topic::{channel_name, validate_topic, DEFAULT_KEY_PREFIX};
use crate::logging::Logger;
use crate::validate::{validated_uuid, SchemaDescriptor, Validator};

const SUBSCRIBE_MAX_ATTEMPTS: u32 = 3;
const SUBSCRIBE_BASE_MS: f64 = 100.0;
const RESUBSCRIBE_BATCH_SIZE: usize = 1000;

fn jittered_backoff(attempt: u32) -> Duration {
    let factor = 2f64.powi((attempt - 1) as i32);
    let jitter = 0.5 + rand::random::<f64>();
    Duration::from_millis((factor * SUBSCRIBE_BASE_MS * jitter).round() as u64)
}

/// A typed event a host application emits over fan-out via
/// `emit(messageLike, topic, data)`.
pub struct FanoutMessageDescriptor {
    /// Carried as `name` in the serialized envelope.
    pub name: String,
    /// Optional schema `data` is validated against before publish.
    pub schema: Option<SchemaDescriptor>,
}

/// Tuning knobs for a [`FanoutProvider`].
#[derive(Debug, Clone)]
pub struct FanoutProviderConfig {
    /// Broker channel prefix (default `"ws"`).
    pub key_prefix: String,
    /// Bound on establishing both broker connections (default 2s).
    pub connect_timeout: Duration,
}

impl Default for FanoutProviderConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// Bridges local WebSocket topic subscriptions with a pub/sub broker.
pub struct FanoutProvider {
    state: Arc<FanoutState>,
    local_server: Arc<RwLock<Option<Arc<dyn LocalServer>>>>,
    publisher: Arc<dyn BrokerPublisher>,
    subscriber: Arc<dyn BrokerSubscriber>,
    validator: Arc<dyn Validator>,
    logger: Arc<dyn Logger>,
    config: FanoutProviderConfig,
    retry_handles: Mutex<std::collections::HashMap<String, JoinHandle<()>>>,
    recv_loop: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl FanoutProvider {
    /// Build a provider over a broker's publisher/subscriber connections.
    pub fn new(
        publisher: Arc<dyn BrokerPublisher>,
        subscriber: Arc<dyn BrokerSubscriber>,
        validator: Arc<dyn Validator>,
        config: FanoutProviderConfig,
    ) -> Self {
        Self {
            state: Arc::new(FanoutState::new()),
            local_server: Arc::new(RwLock::new(None)),
            publisher,
            subscriber,
            validator,
            logger: crate::logging::from_meta("fanout", PropagationMeta::default()),
            config,
            retry_handles: Mutex::new(std::collections::HashMap::new()),
            recv_loop: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Bind the local WebSocket server deliveries are bridged into.
    pub fn set_server(&self, server: Arc<dyn LocalServer>) {
        *self.local_server.write().unwrap() = Some(server);
    }

    /// Subscribe `socket_id` to `topic`. Idempotent on (socketId, topic).
    pub async fn subscribe(&self, socket_id: &str, topic: &str) -> ConduitResult<()> {
        validated_uuid("socketId", socket_id)?;
        validate_topic(topic)?;
        let channel = channel_name(&self.config.key_prefix, topic);
        if self.state.subscribe_local(socket_id, topic, &channel) == LocalSubscribeOutcome::NeedsBrokerSubscribe {
            self.spawn_subscribe_retry(channel);
        }
        Ok(())
    }

    fn spawn_subscribe_retry(&self, channel: String) {
        let subscriber = self.subscriber.clone();
        let state = self.state.clone();
        let logger = self.logger.clone();
        let channel_for_task = channel.clone();
        let handle = tokio::spawn(async move {
            for attempt in 1..=SUBSCRIBE_MAX_ATTEMPTS {
                match subscriber.subscribe_many(&[channel_for_task.clone()]).await {
                    Ok(()) => {
                        state.confirm_broker_subscribed(&channel_for_task);
                        return;
                    }
                    Err(e) if attempt < SUBSCRIBE_MAX_ATTEMPTS => {
                        logger.warn(&format!("broker subscribe attempt {attempt} failed for channel {channel_for_task}: {e}"));
                        tokio::time::sleep(jittered_backoff(attempt)).await;
                    }
                    Err(e) => {
                        logger.error(&format!("broker subscribe exhausted retries for channel {channel_for_task}: {e}"));
                        state.clear_pending_subscribe(&channel_for_task);
                    }
                }
            }
        });
        self.retry_handles.lock().unwrap().insert(channel, handle);
    }

    /// Unsubscribe `socket_id` from `topic`. Idempotent.
    pub async fn unsubscribe(&self, socket_id: &str, topic: &str) -> ConduitResult<()> {
        validated_uuid("socketId", socket_id)?;
        validate_topic(topic)?;
        let channel = channel_name(&self.config.key_prefix, topic);
        if self.state.unsubscribe_local(socket_id, topic, &channel) == LocalUnsubscribeOutcome::NeedsBrokerUnsubscribe {
            if let Err(e) = self.subscriber.unsubscribe(&channel).await {
                self.logger.error(&format!("broker unsubscribe failed for channel {channel}: {e}"));
            }
            self.state.confirm_broker_unsubscribed(&channel);
        }
        Ok(())
    }

    /// Unsubscribe every topic `socket_id` holds, then forget it.
    pub async fn disconnect(&self, socket_id: &str) -> ConduitResult<()> {
        validated_uuid("socketId", socket_id)?;
        for topic in self.state.topics_for(socket_id) {
            self.unsubscribe(socket_id, &topic).await?;
        }
        self.state.finish_disconnect(socket_id);
        Ok(())
    }

    /// Publish `payload` to `topic` via the broker.
    pub async fn publish(&self, topic: &str, payload: FanoutPayload) -> ConduitResult<()> {
        validate_topic(topic)?;
        let channel = channel_name(&self.config.key_prefix, topic);
        let (message, is_binary) = match payload {
            FanoutPayload::Text(s) => (s, false),
            FanoutPayload::Binary(bytes) => (BASE64.encode(bytes), true),
        };
        let envelope = json!({ "topic": topic, "message": message, "isBinary": is_binary });
        let result = self.publisher.publish(&channel, envelope).await;
        if let Err(e) = &result {
            self.logger.error(&format!("publish failed for topic {topic}: {e}"));
        }
        result
    }

    /// Convenience wrapper: publish to the per-socket channel.
    pub async fn send(&self, socket_id: &str, payload: FanoutPayload) -> ConduitResult<()> {
        validated_uuid("socketId", socket_id)?;
        self.publish(&format!("__socket__:{socket_id}"), payload).await
    }

    /// Convenience wrapper: publish to the broadcast channel.
    pub async fn broadcast(&self, payload: FanoutPayload) -> ConduitResult<()> {
        self.publish("__broadcast__", payload).await
    }

    /// Validate `data` against `message.schema`, serialize
    /// `{name, data, timestamp}`, and publish to `topic`.
    pub async fn emit(&self, message: &FanoutMessageDescriptor, topic: &str, data: Value) -> ConduitResult<()> {
        let validated = match &message.schema {
            Some(schema) => self
                .validator
                .validate(schema, &data)
                .map_err(ConduitError::ValidationFailed)?,
            None => data,
        };
        let envelope = json!({
            "name": message.name,
            "data": validated,
            "timestamp": now_millis(),
        });
        let serialized = serde_json::to_string(&envelope).map_err(|e| ConduitError::InvalidArgument(e.to_string()))?;
        self.publish(topic, FanoutPayload::Text(serialized)).await
    }

    /// Establish both broker connections and start the receive loop.
    /// Idempotent.
    pub async fn start(&self) -> ConduitResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.publisher.connect(self.config.connect_timeout).await?;
        self.subscriber.connect(self.config.connect_timeout).await?;

        let subscriber = self.subscriber.clone();
        let state = self.state.clone();
        let logger = self.logger.clone();
        let incoming = FanoutIncoming {
            local_server: self.local_server.clone(),
            logger: logger.clone(),
        };

        let handle = tokio::spawn(async move {
            loop {
                match subscriber.recv().await {
                    Ok(BrokerEvent::Message { channel, payload }) => {
                        incoming.handle(&channel, payload).await;
                    }
                    Ok(BrokerEvent::Ready) => {
                        let channels = state.broker_subscriptions_snapshot();
                        for chunk in channels.chunks(RESUBSCRIBE_BATCH_SIZE) {
                            if let Err(e) = subscriber.subscribe_many(chunk).await {
                                logger.error(&format!("resubscribe batch failed: {e}"));
                            }
                        }
                    }
                    Ok(BrokerEvent::Closed) => break,
                    Err(e) => {
                        logger.error(&format!("broker receive loop error: {e}"));
                    }
                }
            }
        });
        *self.recv_loop.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Best-effort UNSUBSCRIBE of every channel, cancel pending retries,
    /// close both broker connections. Idempotent.
    pub async fn stop(&self) -> ConduitResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(handle) = self.recv_loop.lock().unwrap().take() {
            handle.abort();
        }
        for (_, handle) in self.retry_handles.lock().unwrap().drain() {
            handle.abort();
        }
        for channel in self.state.broker_subscriptions_snapshot() {
            let _ = self.subscriber.unsubscribe(&channel).await;
        }
        let _ = self.publisher.close().await;
        let _ = self.subscriber.close().await;
        Ok(())
    }
}

/// Owns just what incoming-message handling needs, so the receive loop
/// doesn't need an `Arc<FanoutProvider>` / self-referential construction.
struct FanoutIncoming {
    local_server: Arc<RwLock<Option<Arc<dyn LocalServer>>>>,
    logger: Arc<dyn Logger>,
}

impl FanoutIncoming {
    async fn handle(&self, channel: &str, raw: Value) {
        let sanitized = sanitize_value(raw);
        let (topic, message, is_binary) = match (
            sanitized.get("topic").and_then(Value::as_str),
            sanitized.get("message").and_then(Value::as_str),
            sanitized.get("isBinary").and_then(Value::as_bool),
        ) {
            (Some(topic), Some(message), Some(is_binary)) if !topic.is_empty() => (topic.to_string(), message.to_string(), is_binary),
            _ => {
                self.logger.warn(&format!("dropping malformed fan-out envelope on channel {channel}"));
                return;
            }
        };

        let server = self.local_server.read().unwrap().clone();
        let Some(server) = server else {
            self.logger.warn(&format!("dropping fan-out message on channel {channel}: no local server bound"));
            return;
        };

        let payload = if is_binary {
            match BASE64.decode(message.as_bytes()) {
                Ok(bytes) => FanoutPayload::Binary(bytes),
                Err(e) => {
                    self.logger.warn(&format!("dropping fan-out message on channel {channel}: invalid base64: {e}"));
                    return;
                }
            }
        } else {
            FanoutPayload::Text(message)
        };

        if let Err(e) = server.publish(&topic, payload).await {
            self.logger.error(&format!("local server publish failed for topic {topic}: {e}"));
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::sync::mpsc;

    use crate::validate::PermissiveValidator;

    /// An in-memory broker double: `publish`ing on one handle's channel
    /// delivers to every subscriber handle subscribed to it, simulating a
    /// second process instance sharing the same broker.
    #[derive(Default)]
    struct MemoryBroker {
        subscribers: Mutex<Vec<(Vec<String>, mpsc::UnboundedSender<BrokerEvent>)>>,
    }

    impl MemoryBroker {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn register(&self, channels: Vec<String>, tx: mpsc::UnboundedSender<BrokerEvent>) {
            self.subscribers.lock().unwrap().push((channels, tx));
        }

        fn add_channels(&self, tx_id: usize, channels: &[String]) {
            let mut subs = self.subscribers.lock().unwrap();
            if let Some((chans, _)) = subs.get_mut(tx_id) {
                chans.extend(channels.iter().cloned());
            }
        }

        fn remove_channel(&self, tx_id: usize, channel: &str) {
            let mut subs = self.subscribers.lock().unwrap();
            if let Some((chans, _)) = subs.get_mut(tx_id) {
                chans.retain(|c| c != channel);
            }
        }

        fn publish(&self, channel: &str, payload: Value) {
            for (channels, tx) in self.subscribers.lock().unwrap().iter() {
                if channels.iter().any(|c| c == channel) {
                    let _ = tx.send(BrokerEvent::Message {
                        channel: channel.to_string(),
                        payload: payload.clone(),
                    });
                }
            }
        }
    }

    struct FakePublisher {
        broker: Arc<MemoryBroker>,
    }

    #[async_trait::async_trait]
    impl BrokerPublisher for FakePublisher {
        async fn connect(&self, _timeout: Duration) -> ConduitResult<()> {
            Ok(())
        }
        async fn publish(&self, channel: &str, envelope: Value) -> ConduitResult<()> {
            self.broker.publish(channel, envelope);
            Ok(())
        }
        async fn close(&self) -> ConduitResult<()> {
            Ok(())
        }
    }

    struct FakeSubscriber {
        broker: Arc<MemoryBroker>,
        tx_id: AsyncMutex<Option<usize>>,
        rx: AsyncMutex<mpsc::UnboundedReceiver<BrokerEvent>>,
        tx: mpsc::UnboundedSender<BrokerEvent>,
    }

    impl FakeSubscriber {
        fn new(broker: Arc<MemoryBroker>) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                broker,
                tx_id: AsyncMutex::new(None),
                rx: AsyncMutex::new(rx),
                tx,
            }
        }
    }

    #[async_trait::async_trait]
    impl BrokerSubscriber for FakeSubscriber {
        async fn connect(&self, _timeout: Duration) -> ConduitResult<()> {
            self.broker.register(Vec::new(), self.tx.clone());
            let id = self.broker.subscribers.lock().unwrap().len() - 1;
            *self.tx_id.lock().await = Some(id);
            Ok(())
        }
        async fn subscribe_many(&self, channels: &[String]) -> ConduitResult<()> {
            let id = self.tx_id.lock().await.expect("connect first");
            self.broker.add_channels(id, channels);
            Ok(())
        }
        async fn unsubscribe(&self, channel: &str) -> ConduitResult<()> {
            let id = self.tx_id.lock().await.expect("connect first");
            self.broker.remove_channel(id, channel);
            Ok(())
        }
        async fn recv(&self) -> ConduitResult<BrokerEvent> {
            let mut rx = self.rx.lock().await;
            Ok(rx.recv().await.unwrap_or(BrokerEvent::Closed))
        }
        async fn close(&self) -> ConduitResult<()> {
            Ok(())
        }
    }

    struct FakeLocalServer {
        deliveries: std_mpsc::Sender<(String, FanoutPayload)>,
    }

    #[async_trait::async_trait]
    impl LocalServer for FakeLocalServer {
        async fn publish(&self, topic: &str, payload: FanoutPayload) -> ConduitResult<()> {
            let _ = self.deliveries.send((topic.to_string(), payload));
            Ok(())
        }
    }

    fn uuid() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn make_provider(broker: &Arc<MemoryBroker>) -> FanoutProvider {
        FanoutProvider::new(
            Arc::new(FakePublisher { broker: broker.clone() }),
            Arc::new(FakeSubscriber::new(broker.clone())),
            Arc::new(PermissiveValidator),
            FanoutProviderConfig::default(),
        )
    }

    #[tokio::test]
    async fn subscribe_wires_a_broker_subscription_that_receives_published_messages() {
        let broker = MemoryBroker::new();
        let provider = make_provider(&broker);
        provider.start().await.unwrap();

        let (tx, rx) = std_mpsc::channel();
        provider.set_server(Arc::new(FakeLocalServer { deliveries: tx }));

        let socket_id = uuid();
        provider.subscribe(&socket_id, "room:1").await.unwrap();
        // subscribe's broker-side bookkeeping runs on a detached task.
        tokio::time::sleep(Duration::from_millis(20)).await;

        provider.publish("room:1", FanoutPayload::Text("hello".to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (topic, payload) = rx.recv_timeout(Duration::from_secs(1)).expect("message delivered");
        assert_eq!(topic, "room:1");
        match payload {
            FanoutPayload::Text(s) => assert_eq!(s, "hello"),
            FanoutPayload::Binary(_) => panic!("expected text payload"),
        }
        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn cross_instance_publish_reaches_a_separately_subscribed_instance() {
        // Two provider instances sharing one broker, simulating two
        // process instances: instance A publishes, instance B (which
        // never saw the socket connect) delivers it locally.
        let broker = MemoryBroker::new();
        let instance_a = make_provider(&broker);
        let instance_b = make_provider(&broker);
        instance_a.start().await.unwrap();
        instance_b.start().await.unwrap();

        let (tx, rx) = std_mpsc::channel();
        instance_b.set_server(Arc::new(FakeLocalServer { deliveries: tx }));

        let socket_id = uuid();
        instance_b.subscribe(&socket_id, "account:42").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        instance_a.publish("account:42", FanoutPayload::Text("cross-instance".to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (topic, _) = rx.recv_timeout(Duration::from_secs(1)).expect("cross-instance delivery");
        assert_eq!(topic, "account:42");

        instance_a.stop().await.unwrap();
        instance_b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn binary_payload_round_trips_through_base64() {
        let broker = MemoryBroker::new();
        let provider = make_provider(&broker);
        provider.start().await.unwrap();

        let (tx, rx) = std_mpsc::channel();
        provider.set_server(Arc::new(FakeLocalServer { deliveries: tx }));

        let socket_id = uuid();
        provider.subscribe(&socket_id, "blobs").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        provider.publish("blobs", FanoutPayload::Binary(vec![1, 2, 3, 255])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (_, payload) = rx.recv_timeout(Duration::from_secs(1)).expect("message delivered");
        match payload {
            FanoutPayload::Binary(bytes) => assert_eq!(bytes, vec![1, 2, 3, 255]),
            FanoutPayload::Text(_) => panic!("expected binary payload"),
        }
        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_stops_further_delivery() {
        let broker = MemoryBroker::new();
        let provider = make_provider(&broker);
        provider.start().await.unwrap();

        let (tx, rx) = std_mpsc::channel();
        provider.set_server(Arc::new(FakeLocalServer { deliveries: tx }));

        let socket_id = uuid();
        provider.subscribe(&socket_id, "room:1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        provider.unsubscribe(&socket_id, "room:1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        provider.publish("room:1", FanoutPayload::Text("too late".to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn emit_serializes_name_data_and_timestamp() {
        let broker = MemoryBroker::new();
        let provider = make_provider(&broker);
        provider.start().await.unwrap();

        let (tx, rx) = std_mpsc::channel();
        provider.set_server(Arc::new(FakeLocalServer { deliveries: tx }));

        let socket_id = uuid();
        provider.subscribe(&socket_id, "orders").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let message = FanoutMessageDescriptor {
            name: "order.created".to_string(),
            schema: None,
        };
        provider.emit(&message, "orders", json!({"orderId": "o1"})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (_, payload) = rx.recv_timeout(Duration::from_secs(1)).expect("message delivered");
        let FanoutPayload::Text(raw) = payload else {
            panic!("expected text payload")
        };
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["name"], "order.created");
        assert_eq!(parsed["data"]["orderId"], "o1");
        assert!(parsed["timestamp"].is_u64());
        provider.stop().await.unwrap();
    }

    #[test]
    fn jittered_backoff_grows_and_stays_within_expected_bounds() {
        for attempt in 1..=3 {
            let d = jittered_backoff(attempt);
            let factor = 2f64.powi((attempt - 1) as i32);
            let lower = factor * SUBSCRIBE_BASE_MS * 0.5;
            let upper = factor * SUBSCRIBE_BASE_MS * 1.5;
            let ms = d.as_millis() as f64;
            assert!(ms >= lower && ms <= upper, "attempt {attempt} backoff {ms}ms out of [{lower}, {upper}]");
        }
    }
}

//! Broker and local-server collaborator contracts — external dependencies,
//! not part of this crate's own wire format. A host application provides
//! concrete implementations (Redis pub/sub, NATS, an in-memory test
//! double, ...).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ConduitResult;

/// What a socket server bridges fan-out messages into.
#[derive(Debug, Clone)]
pub enum FanoutPayload {
    /// A UTF-8 text payload.
    Text(String),
    /// A binary payload, base64-encoded on the wire.
    Binary(Vec<u8>),
}

/// The local WebSocket server a [`super::provider::FanoutProvider`] drives
/// deliveries into.
#[async_trait]
pub trait LocalServer: Send + Sync {
    /// Deliver `payload` to every local socket subscribed to `topic`.
    async fn publish(&self, topic: &str, payload: FanoutPayload) -> ConduitResult<()>;
}

/// The publisher half of the broker connection. Subscriber-mode
/// connections must not implement this — enforced by callers only holding
/// the half they need, not by the type system, since a single transport
/// connection may implement both traits.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Establish the connection, bounded by `timeout`.
    async fn connect(&self, timeout: Duration) -> ConduitResult<()>;
    /// Publish `envelope` to `channel`.
    async fn publish(&self, channel: &str, envelope: Value) -> ConduitResult<()>;
    /// Close gracefully.
    async fn close(&self) -> ConduitResult<()>;
}

/// One message observed on the subscriber connection.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// A PUBLISH delivered on a subscribed channel.
    Message {
        /// The channel the message arrived on.
        channel: String,
        /// The (still unsanitized) parsed envelope.
        payload: Value,
    },
    /// The subscriber connection (re)established readiness — triggers
    /// resubscription of every tracked channel.
    Ready,
    /// The subscriber connection closed and will not emit further events.
    Closed,
}

/// The subscriber half of the broker connection.
#[async_trait]
pub trait BrokerSubscriber: Send + Sync {
    /// Establish the connection, bounded by `timeout`.
    async fn connect(&self, timeout: Duration) -> ConduitResult<()>;
    /// Issue a single SUBSCRIBE command over `channels` (≤ 1000 per the
    /// batching limit; callers are responsible for chunking).
    async fn subscribe_many(&self, channels: &[String]) -> ConduitResult<()>;
    /// Issue UNSUBSCRIBE for one channel.
    async fn unsubscribe(&self, channel: &str) -> ConduitResult<()>;
    /// Await the next event. Implementations should return
    /// `BrokerEvent::Closed` (not an error) once no further events will
    /// ever arrive, so the receive loop can exit cleanly.
    async fn recv(&self) -> ConduitResult<BrokerEvent>;
    /// Close gracefully.
    async fn close(&self) -> ConduitResult<()>;
}

//! WebSocket fan-out: cross-instance delivery bridging a local WebSocket
//! server with a pub/sub broker.

mod broker;
mod provider;
mod sanitize;
mod state;
mod topic;

pub use broker::{BrokerEvent, BrokerPublisher, BrokerSubscriber, FanoutPayload, LocalServer};
pub use provider::{FanoutMessageDescriptor, FanoutProvider, FanoutProviderConfig};
pub use topic::{channel_name, validate_topic, DEFAULT_KEY_PREFIX};

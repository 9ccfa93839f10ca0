//! Event bus: wire envelope, handler registry, delivery engine, providers,
//! and the registry/system facade.

mod context;
mod delivery;
mod message;
mod provider;
mod registry;
mod system;

pub use context::{ChainedEmit, EmitOptions, EventContext};
pub use delivery::DeliveryEngine;
pub use message::{EventMessage, EVENT_MESSAGE_VERSION};
pub use provider::{
    DistributedEventProvider, EventProvider, InProcessEventProvider, InProcessProviderConfig, JobQueue,
    TestEventProvider,
};
pub use registry::{handler_fn, EventHandler, HandlerRegistry};
pub use system::{EventRegistry, EventRegistryBuilder, EventSystem};

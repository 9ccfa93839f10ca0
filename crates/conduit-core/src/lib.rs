//! # conduit-core
//!
//! Three tightly coupled subsystems for backend application services:
//! an event bus with request/response and causation tracking, a workflow
//! engine with ordered step groups and compensating rollback, and a
//! WebSocket fan-out provider that bridges a local socket server to a
//! shared pub/sub broker.
//!
//! Everything else a real service needs — HTTP routing, a DI container, a
//! schema validation library, a config loader — is treated as an external
//! collaborator and only touched through the contracts in [`logging`] and
//! [`validate`].

#![deny(unsafe_code)]

/// Crate-wide error type.
pub mod error;

/// Identifiers and ambient propagation context (correlation/trace/span ids).
pub mod context;

/// The `Logger` contract consumed by every subsystem.
pub mod logging;

/// The schema `Validator` contract, plus param/UUID validation helpers.
pub mod validate;

/// LRU+TTL idempotency set.
pub mod idempotency;

/// One-shot settleable `Subscription`.
pub mod subscription;

/// Event bus: handler registry, delivery engine, providers, registry/system
/// facade.
pub mod event;

/// Workflow engine: context, definitions, provider.
pub mod workflow;

/// WebSocket router: route builder, guards, pipeline.
pub mod socket;

/// WebSocket fan-out provider bridging a local server to a broker.
pub mod fanout;

pub use error::ConduitError;

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::context::{CorrelationId, PropagationMeta};
    pub use crate::error::ConduitError;
    pub use crate::event::{
        EventContext, EventMessage, EventProvider, EventRegistry, EventSystem,
    };
    pub use crate::fanout::{
        BrokerEvent, BrokerPublisher, BrokerSubscriber, FanoutMessageDescriptor, FanoutPayload, FanoutProvider,
        FanoutProviderConfig, LocalServer,
    };
    pub use crate::idempotency::IdempotencySet;
    #[cfg(feature = "otel")]
    pub use crate::logging::TracingLogger;
    pub use crate::logging::Logger;
    pub use crate::socket::{
        ClientMessage, RouteBuilder, ServerMessage, SocketContext, SocketGuard, SocketHandler, SocketPipeline,
        SocketRouteDefinition,
    };
    pub use crate::subscription::Subscription;
    pub use crate::validate::{validated_param, validated_uuid, Validator};
    pub use crate::workflow::{
        FlowHandle, FlowStatus, WorkflowConsumer, WorkflowContext, WorkflowOptions, WorkflowProvider, WorkflowStep,
    };
}

//! WebSocket message routing: guards, compiled routes, the connection/
//! message pipeline, and wire envelopes.

mod envelope;
mod guard;
mod pipeline;
mod route;

pub use envelope::{ClientMessage, ServerMessage, CLOSE_POLICY_VIOLATION};
pub use guard::{ConnectionState, SocketGuard};
pub use pipeline::{SocketContext, SocketPipeline};
pub use route::{RouteBuilder, RoutingCoordinator, SocketHandler, SocketRouteDefinition};

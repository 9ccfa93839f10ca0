//! Connection guards and per-connection state.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ConduitResult;
use crate::socket::pipeline::SocketContext;

/// An explicit interface in place of duck-typed or reflection-resolved
/// guard classes, generalized from a request handler trait shape to a
/// boolean activation gate.
#[async_trait]
pub trait SocketGuard: Send + Sync {
    /// Return `Ok(false)` to deny, `Err(_)` is treated the same as denial.
    /// May mutate `ctx.state`; mutations are persisted into the connection's
    /// state on accept.
    async fn can_activate(&self, ctx: &mut SocketContext) -> ConduitResult<bool>;
}

/// Per-socket state populated by connection guards and visible to every
/// message handler on that connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    /// Arbitrary key/value bag guards may populate.
    pub state: HashMap<String, Value>,
    /// `true` once connection guards accepted this connection.
    pub initialized: bool,
}

//! Socket routing: route definitions, the fluent builder with an explicit
//! cursor, and the coordinator that holds compiled routes and per-socket
//! connection state.
//!
//! The builder returns `Self` by value for fluent chaining, generalized
//! with an explicit `Cursor` tracking "router scope" vs "a specific
//! route's scope" rather than a hidden mutable "current route" field.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ConduitError, ConduitResult};
use crate::socket::guard::{ConnectionState, SocketGuard};
use crate::socket::pipeline::SocketContext;
use crate::validate::SchemaDescriptor;

/// An explicit interface for a message handler: no duck-typed or
/// reflection-resolved handlers.
#[async_trait]
pub trait SocketHandler: Send + Sync {
    /// Handle one message; the returned value becomes `data` in the
    /// outbound envelope.
    async fn handle(&self, ctx: &SocketContext) -> ConduitResult<Value>;
}

/// A registered route: message type, handler, effective guards at
/// registration time, and an optional schema. Already "compiled" — guard
/// instances are supplied directly rather than resolved reflectively from
/// a DI container, so there is no separate resolution step here.
#[derive(Clone)]
pub struct SocketRouteDefinition {
    /// Discriminator matched against `ClientMessage::message_type`.
    pub message_type: String,
    /// The handler invoked on a match.
    pub handler: Arc<dyn SocketHandler>,
    /// Effective guard list at the time this route was registered.
    pub guards: Vec<Arc<dyn SocketGuard>>,
    /// Optional opaque schema for validating inbound `data`.
    pub schema: Option<SchemaDescriptor>,
}

/// Where builder mutations (`guard`, `guards`, `clear_guards`) currently
/// apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Router,
    Route(usize),
}

/// Fluent builder over connection guards and message routes, with an
/// explicit cursor instead of an implicit "current route" pointer.
pub struct RouteBuilder {
    connection_guards: Vec<Arc<dyn SocketGuard>>,
    router_guards: Vec<Arc<dyn SocketGuard>>,
    routes: Vec<SocketRouteDefinition>,
    cursor: Cursor,
}

impl Default for RouteBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteBuilder {
    /// Start an empty builder, cursor at router scope.
    pub fn new() -> Self {
        Self {
            connection_guards: Vec::new(),
            router_guards: Vec::new(),
            routes: Vec::new(),
            cursor: Cursor::Router,
        }
    }

    /// Append a guard that runs once per connection.
    pub fn connection_guard(mut self, guard: Arc<dyn SocketGuard>) -> Self {
        self.connection_guards.push(guard);
        self
    }

    /// Append `guard` at the cursor's current scope: router-level guards
    /// if no route has been registered yet (or the cursor was reset),
    /// otherwise the most recently registered route's own guard list.
    pub fn guard(mut self, guard: Arc<dyn SocketGuard>) -> Self {
        match self.cursor {
            Cursor::Router => self.router_guards.push(guard),
            Cursor::Route(idx) => self.routes[idx].guards.push(guard),
        }
        self
    }

    /// Replace the guard list at the cursor's current scope wholesale.
    pub fn guards(mut self, guards: Vec<Arc<dyn SocketGuard>>) -> Self {
        match self.cursor {
            Cursor::Router => self.router_guards = guards,
            Cursor::Route(idx) => self.routes[idx].guards = guards,
        }
        self
    }

    /// Empty the guard list at the cursor's current scope.
    pub fn clear_guards(self) -> Self {
        self.guards(Vec::new())
    }

    /// Register a route. Its effective guard snapshot is `router_guards`
    /// at this point in the chain; the cursor moves onto this route so
    /// subsequent `guard`/`guards`/`clear_guards` calls target it alone.
    pub fn on(mut self, message_type: impl Into<String>, handler: Arc<dyn SocketHandler>, schema: Option<SchemaDescriptor>) -> Self {
        let route = SocketRouteDefinition {
            message_type: message_type.into(),
            handler,
            guards: self.router_guards.clone(),
            schema,
        };
        self.routes.push(route);
        self.cursor = Cursor::Route(self.routes.len() - 1);
        self
    }

    /// Move the cursor back to router scope, e.g. before registering a
    /// router-wide guard that should not retroactively apply to an
    /// already-registered route.
    pub fn at_router_scope(mut self) -> Self {
        self.cursor = Cursor::Router;
        self
    }

    /// Freeze the builder into immutable connection guards and routes.
    pub fn build(self) -> (Vec<Arc<dyn SocketGuard>>, Vec<SocketRouteDefinition>) {
        (self.connection_guards, self.routes)
    }
}

/// Holds compiled routes and per-socket connection state.
pub struct RoutingCoordinator {
    connection_guards: Vec<Arc<dyn SocketGuard>>,
    routes: RwLock<HashMap<String, SocketRouteDefinition>>,
    connections: RwLock<HashMap<String, ConnectionState>>,
}

impl RoutingCoordinator {
    /// Build a coordinator from a finished [`RouteBuilder`]. Returns
    /// `InvalidArgument` if two routes (possibly from different routers
    /// merged together) claim the same `message_type` — a registration-time
    /// fatal error.
    pub fn new(connection_guards: Vec<Arc<dyn SocketGuard>>, routes: Vec<SocketRouteDefinition>) -> ConduitResult<Self> {
        let mut map = HashMap::with_capacity(routes.len());
        for route in routes {
            if map.insert(route.message_type.clone(), route).is_some() {
                return Err(ConduitError::InvalidArgument(format!(
                    "duplicate messageType registered: {}",
                    map.keys().last().cloned().unwrap_or_default()
                )));
            }
        }
        Ok(Self {
            connection_guards,
            routes: RwLock::new(map),
            connections: RwLock::new(HashMap::new()),
        })
    }

    /// Merge another builder's compiled output into this coordinator.
    /// Fails the same way as [`RoutingCoordinator::new`] on a duplicate
    /// `message_type`.
    pub fn merge(&self, routes: Vec<SocketRouteDefinition>) -> ConduitResult<()> {
        let mut map = self.routes.write().unwrap();
        for route in routes {
            if map.contains_key(&route.message_type) {
                return Err(ConduitError::InvalidArgument(format!("duplicate messageType registered: {}", route.message_type)));
            }
            map.insert(route.message_type.clone(), route);
        }
        Ok(())
    }

    pub(crate) fn connection_guards(&self) -> &[Arc<dyn SocketGuard>] {
        &self.connection_guards
    }

    pub(crate) fn route_for(&self, message_type: &str) -> Option<SocketRouteDefinition> {
        self.routes.read().unwrap().get(message_type).cloned()
    }

    /// Record accepted connection state once a connection guard admits it.
    pub fn accept_connection(&self, socket_id: impl Into<String>, state: ConnectionState) {
        self.connections.write().unwrap().insert(socket_id.into(), state);
    }

    pub(crate) fn connection_state(&self, socket_id: &str) -> Option<ConnectionState> {
        self.connections.read().unwrap().get(socket_id).cloned()
    }

    /// Remove connection state when the underlying socket closes.
    pub fn remove_connection(&self, socket_id: &str) {
        self.connections.write().unwrap().remove(socket_id);
    }
}

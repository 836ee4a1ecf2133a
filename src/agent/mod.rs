//! Agent layer: the capability contract between the host and its plugins.
//!
//! An agent is any `Arc<dyn Agent>`. What it can do is discovered at load
//! time through three optional capabilities:
//!
//! - [`HttpCapable`]: registers sub-routes on its own [`AgentRouter`]
//! - [`WebSocketCapable`]: registers upgrade endpoints on a [`SocketSurface`]
//! - [`CleanupCapable`]: releases resources at shutdown
//!
//! Agents are built by [`AgentFactory`] implementations registered in an
//! [`AgentCatalog`]. The entry file of an agent package names the factory.

pub mod builtin;
pub mod entry;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::WebSocket;
use axum::routing::{MethodRouter, get};
use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::error::AgentError;

pub use entry::{EntryError, EntryFile};

/// A live agent instance.
///
/// Every capability defaults to absent. Implementations return `Some(self)`
/// for the capabilities they support.
pub trait Agent: Send + Sync + 'static {
    fn http(&self) -> Option<&dyn HttpCapable> {
        None
    }

    fn websocket(&self) -> Option<&dyn WebSocketCapable> {
        None
    }

    fn lifecycle(&self) -> Option<&dyn CleanupCapable> {
        None
    }
}

/// Agents reachable over HTTP.
pub trait HttpCapable: Send + Sync {
    /// Register sub-routes. Paths are relative to the agent's mount points.
    fn attach(&self, router: &mut AgentRouter) -> Result<(), AgentError>;
}

/// Agents accepting WebSocket connections.
pub trait WebSocketCapable: Send + Sync {
    fn init_websocket(&self, sockets: &mut SocketSurface<'_>) -> Result<(), AgentError>;
}

/// Agents holding resources that must be released at shutdown.
pub trait CleanupCapable: Send + Sync {
    fn cleanup(&self) -> BoxFuture<'_, Result<(), AgentError>>;
}

/// Which capabilities an agent exposed when it was loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub http: bool,
    pub websocket: bool,
    pub cleanup: bool,
    /// Number of HTTP routes registered by `attach`.
    pub routes: usize,
    /// Number of WebSocket endpoints registered by `init_websocket`.
    pub sockets: usize,
}

impl Capabilities {
    pub(crate) fn probe(agent: &dyn Agent, router: &AgentRouter) -> Self {
        Self {
            http: agent.http().is_some(),
            websocket: agent.websocket().is_some(),
            cleanup: agent.lifecycle().is_some(),
            routes: router.routes.len(),
            sockets: router.sockets.len(),
        }
    }

    /// Whether any request can reach the agent.
    pub fn is_reachable(&self) -> bool {
        self.routes > 0 || self.sockets > 0
    }
}

// ---------------------------------------------------------------------------
// Sub-surfaces
// ---------------------------------------------------------------------------

/// Isolated routing scope owned by one agent.
///
/// The loader nests the finished router at both of the agent's mount paths.
#[derive(Default)]
pub struct AgentRouter {
    router: Router,
    routes: Vec<String>,
    sockets: Vec<String>,
}

impl AgentRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. `path` must start with `/`.
    pub fn route(&mut self, path: &str, method_router: MethodRouter) -> &mut Self {
        self.router = std::mem::take(&mut self.router).route(path, method_router);
        self.routes.push(path.to_string());
        self
    }

    /// Paths registered through [`AgentRouter::route`].
    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    /// Paths registered through a [`SocketSurface`].
    pub fn sockets(&self) -> &[String] {
        &self.sockets
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.sockets.is_empty()
    }

    pub(crate) fn into_router(self) -> Router {
        self.router
    }
}

/// Connection-upgrade registration scoped to one agent's router.
pub struct SocketSurface<'a> {
    router: &'a mut AgentRouter,
}

impl<'a> SocketSurface<'a> {
    pub(crate) fn new(router: &'a mut AgentRouter) -> Self {
        Self { router }
    }

    /// Accept WebSocket upgrades on `path` and hand each socket to `handler`.
    pub fn on_upgrade<H, Fut>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(WebSocket) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let upgrade = move |ws: WebSocketUpgrade| {
            let handler = handler.clone();
            async move { ws.on_upgrade(handler) }
        };
        let router = &mut *self.router;
        router.router = std::mem::take(&mut router.router).route(path, get(upgrade));
        router.sockets.push(path.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Builds an agent from its merged configuration object.
pub trait AgentFactory: Send + Sync {
    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn Agent>, AgentError>;
}

impl<F> AgentFactory for F
where
    F: Fn(&serde_json::Value) -> Result<Arc<dyn Agent>, AgentError> + Send + Sync,
{
    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn Agent>, AgentError> {
        self(config)
    }
}

/// Registered agent factories, keyed by the name entry files refer to.
#[derive(Clone, Default)]
pub struct AgentCatalog {
    factories: BTreeMap<String, Arc<dyn AgentFactory>>,
}

impl AgentCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the agents shipped in this crate.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog
            .register(builtin::echo::FACTORY, builtin::echo::create)
            .register(builtin::heartbeat::FACTORY, builtin::heartbeat::create);
        catalog
    }

    /// Register a factory. A factory with the same key is replaced.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        factory: impl AgentFactory + 'static,
    ) -> &mut Self {
        let key = key.into();
        if self.factories.insert(key.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(factory = %key, "replacing previously registered agent factory");
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn AgentFactory>> {
        self.factories.get(key).cloned()
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for AgentCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCatalog")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

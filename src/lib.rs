// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # epistery-host
//!
//! A multi-tenant HTTP host that serves pluggable agents for many domains
//! from one process.
//!
//! ## Architecture
//!
//! - **Manifests** (`manifest`): `epistery.json` descriptors of agent packages
//! - **Discovery** (`discovery`): scan the agents directory for loadable packages
//! - **Agents** (`agent`): capability traits, sub-routers and the factory catalog
//! - **Loader** (`loader`): construct, attach and mount one agent at a time
//! - **Namespaces** (`namespace`): `/.well-known/epistery/agent/<name>` and `/agent/<name>`
//! - **Registry** (`registry`): loaded agents, indexed by local name, name and route
//! - **Lifecycle** (`lifecycle`): `Idle → … → Active → ShuttingDown → Stopped`
//! - **Domains** (`domain`, `navigation`): per-domain enablement and menus
//! - **Server** (`server`): host API merged with the agent mounts
//!
//! ## Library usage
//!
//! ```no_run
//! use std::time::Duration;
//! use epistery_host::agent::AgentCatalog;
//! use epistery_host::lifecycle::LifecycleController;
//! use epistery_host::loader::AgentLoader;
//!
//! # async fn run() -> epistery_host::error::HostResult<()> {
//! let controller = LifecycleController::new(
//!     "/srv/epistery/agents",
//!     AgentLoader::new(AgentCatalog::builtin()),
//!     Duration::from_secs(10),
//! );
//! let startup = controller.start().await?;
//! println!("{} agents active", startup.registry.len());
//! controller.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod namespace;
pub mod navigation;
pub mod paths;
pub mod registry;
pub mod server;

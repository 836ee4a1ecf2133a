//! Agent loader: turn a discovery record into a mounted, registered agent.
//!
//! Loading is sequential and fault-isolated. A failure at any step aborts
//! only that agent; the parent router and the registry are touched only
//! after every earlier step has succeeded. Panics raised by agent code while
//! constructing or attaching are caught and reported as load errors. An agent
//! that was constructed but failed to attach gets its cleanup hook run before
//! it is dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serde::Serialize;

use crate::agent::{Agent, AgentCatalog, AgentRouter, Capabilities, EntryFile, SocketSurface};
use crate::discovery::DiscoveryRecord;
use crate::error::{AgentError, LoadError};
use crate::namespace::MountPaths;
use crate::registry::{AgentRegistry, RegistryEntry, guarded_cleanup};

/// Upper bound on the cleanup of an agent that failed to attach.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// What a successful load produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedAgent {
    pub local_name: String,
    pub name: String,
    pub mount_paths: MountPaths,
    pub capabilities: Capabilities,
}

/// Result of loading a batch of records.
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: Vec<LoadedAgent>,
    pub failures: Vec<LoadError>,
}

/// Builds agents through the factories of an [`AgentCatalog`].
#[derive(Debug, Clone)]
pub struct AgentLoader {
    catalog: AgentCatalog,
}

impl AgentLoader {
    pub fn new(catalog: AgentCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    /// Load one agent and mount it on `router` at both of its mount paths.
    pub async fn load(
        &self,
        record: &DiscoveryRecord,
        router: &mut Router,
        registry: &mut AgentRegistry,
    ) -> Result<LoadedAgent, LoadError> {
        let local_name = record.local_name.as_str();
        let manifest = &record.manifest;

        if !manifest.has_name() {
            return Err(LoadError::MissingName {
                local_name: local_name.to_string(),
            });
        }

        let import_failure = |message: String| LoadError::ImportFailure {
            local_name: local_name.to_string(),
            message,
        };
        let entry = EntryFile::read(&record.entry_path).map_err(|e| import_failure(e.to_string()))?;
        let factory = self.catalog.get(&entry.factory).ok_or_else(|| {
            import_failure(format!(
                "no agent factory registered as \"{}\"",
                entry.factory
            ))
        })?;

        // Reject namespace conflicts before running any agent code.
        let mount_paths = MountPaths::for_manifest_name(&manifest.name)?;
        registry.check_available(local_name, &manifest.name, &mount_paths)?;

        let config = entry.merged_config(manifest.config.as_ref());
        let instance = guarded(|| factory.create(&config)).map_err(|source| {
            LoadError::ConstructorFailed {
                local_name: local_name.to_string(),
                source,
            }
        })?;

        let mut sub = AgentRouter::new();
        if let Err(source) = attach(instance.as_ref(), &mut sub) {
            release(local_name, instance.as_ref()).await;
            return Err(LoadError::AttachFailed {
                local_name: local_name.to_string(),
                source,
            });
        }
        let capabilities = Capabilities::probe(instance.as_ref(), &sub);

        if sub.is_empty() {
            tracing::debug!(agent = %local_name, "agent registered no routes, nothing to mount");
        } else {
            let sub = sub.into_router();
            *router = std::mem::take(router)
                .nest(&mount_paths.canonical, sub.clone())
                .nest(&mount_paths.short, sub);
        }

        registry.insert(RegistryEntry {
            local_name: local_name.to_string(),
            manifest: manifest.clone(),
            instance: Arc::clone(&instance),
            mount_paths: mount_paths.clone(),
            capabilities,
        })?;

        tracing::info!(
            agent = %local_name,
            name = %manifest.name,
            canonical = %mount_paths.canonical,
            short = %mount_paths.short,
            routes = capabilities.routes,
            sockets = capabilities.sockets,
            "agent loaded"
        );

        Ok(LoadedAgent {
            local_name: local_name.to_string(),
            name: manifest.name.clone(),
            mount_paths,
            capabilities,
        })
    }

    /// Load every record in order, one at a time. Failures are logged and
    /// collected; they never stop the remaining loads.
    pub async fn load_all(
        &self,
        records: &[DiscoveryRecord],
        router: &mut Router,
        registry: &mut AgentRegistry,
    ) -> LoadSummary {
        let mut summary = LoadSummary::default();
        for record in records {
            match self.load(record, router, registry).await {
                Ok(loaded) => summary.loaded.push(loaded),
                Err(e) => {
                    tracing::error!(
                        agent = %record.local_name,
                        error = %e,
                        "failed to load agent, skipping"
                    );
                    summary.failures.push(e);
                }
            }
        }
        summary
    }
}

/// Let the agent register its routes and sockets on `sub`.
fn attach(agent: &dyn Agent, sub: &mut AgentRouter) -> Result<(), AgentError> {
    if let Some(http) = agent.http() {
        guarded(|| http.attach(&mut *sub))?;
    }
    if let Some(ws) = agent.websocket() {
        guarded(|| ws.init_websocket(&mut SocketSurface::new(&mut *sub)))?;
    }
    Ok(())
}

/// Run the cleanup hook of an agent that will never be registered.
async fn release(local_name: &str, agent: &dyn Agent) {
    let Some(hook) = agent.lifecycle() else {
        return;
    };
    let deadline = tokio::time::Instant::now() + RELEASE_TIMEOUT;
    match guarded_cleanup(hook, deadline).await {
        Some(Ok(())) => tracing::debug!(agent = %local_name, "released agent that failed to attach"),
        Some(Err(e)) => {
            tracing::warn!(agent = %local_name, error = %e, "cleanup of unattached agent failed")
        }
        None => tracing::warn!(agent = %local_name, "cleanup of unattached agent timed out"),
    }
}

/// Run agent code, turning a panic into [`AgentError::Panicked`].
fn guarded<T>(f: impl FnOnce() -> Result<T, AgentError>) -> Result<T, AgentError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| Err(AgentError::from_panic(panic)))
}

//! Agent registry: the table of loaded agents.
//!
//! The [`AgentRegistry`] keeps entries in insertion order and indexes them by
//! local directory name, manifest name and route name. It is built during
//! startup by the loader, then shared read-only behind an `Arc` until
//! shutdown, when [`AgentRegistry::cleanup_all`] tears every agent down.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;

use crate::agent::{Agent, Capabilities, CleanupCapable};
use crate::error::{AgentError, NamespaceError};
use crate::manifest::AgentManifest;
use crate::namespace::{self, MountPaths};

/// One loaded agent.
pub struct RegistryEntry {
    pub local_name: String,
    pub manifest: AgentManifest,
    pub instance: Arc<dyn Agent>,
    pub mount_paths: MountPaths,
    pub capabilities: Capabilities,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("local_name", &self.local_name)
            .field("name", &self.manifest.name)
            .field("mount_paths", &self.mount_paths)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Metadata-only view of a registry entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub local_name: String,
    pub name: String,
    pub version: String,
    pub mount_paths: MountPaths,
    pub capabilities: Capabilities,
}

/// Loaded agents, in load order.
#[derive(Default)]
pub struct AgentRegistry {
    entries: Vec<RegistryEntry>,
    by_local: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
    by_route: HashMap<String, usize>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that an agent could be inserted without shadowing another.
    pub fn check_available(
        &self,
        local_name: &str,
        name: &str,
        mount_paths: &MountPaths,
    ) -> Result<(), NamespaceError> {
        if self.by_local.contains_key(local_name) {
            return Err(NamespaceError::DuplicateLocalName {
                local_name: local_name.to_string(),
            });
        }
        if let Some(&idx) = self.by_name.get(name) {
            return Err(NamespaceError::DuplicateName {
                name: name.to_string(),
                local_name: local_name.to_string(),
                existing: self.entries[idx].local_name.clone(),
            });
        }
        let route = &mount_paths.route_name;
        if let Some(&idx) = self.by_route.get(route) {
            return Err(NamespaceError::RouteCollision {
                route_name: route.clone(),
                local_name: local_name.to_string(),
                existing: self.entries[idx].local_name.clone(),
            });
        }
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| namespace::routes_nest(&e.mount_paths.route_name, route))
        {
            return Err(NamespaceError::RouteOverlap {
                route_name: route.clone(),
                local_name: local_name.to_string(),
                other: entry.mount_paths.route_name.clone(),
                existing: entry.local_name.clone(),
            });
        }
        Ok(())
    }

    /// Insert an entry. Errors if any of its keys is already taken.
    pub fn insert(&mut self, entry: RegistryEntry) -> Result<(), NamespaceError> {
        self.check_available(&entry.local_name, &entry.manifest.name, &entry.mount_paths)?;

        let idx = self.entries.len();
        self.by_local.insert(entry.local_name.clone(), idx);
        self.by_name.insert(entry.manifest.name.clone(), idx);
        self.by_route
            .insert(entry.mount_paths.route_name.clone(), idx);
        self.entries.push(entry);
        Ok(())
    }

    /// Look up by local directory name.
    pub fn get(&self, local_name: &str) -> Option<&RegistryEntry> {
        self.by_local.get(local_name).map(|&i| &self.entries[i])
    }

    /// Look up by manifest name.
    pub fn get_by_name(&self, name: &str) -> Option<&RegistryEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Entries in load order.
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summaries(&self) -> Vec<AgentSummary> {
        self.entries
            .iter()
            .map(|e| AgentSummary {
                local_name: e.local_name.clone(),
                name: e.manifest.name.clone(),
                version: e.manifest.version.clone(),
                mount_paths: e.mount_paths.clone(),
                capabilities: e.capabilities,
            })
            .collect()
    }

    /// Run `cleanup` on every agent that supports it, in load order.
    ///
    /// Failures and panics are logged and recorded; they never stop the
    /// remaining cleanups. Each cleanup is polled at least once, even after
    /// `deadline` has passed.
    pub async fn cleanup_all(&self, deadline: tokio::time::Instant) -> CleanupReport {
        let mut report = CleanupReport::default();

        for entry in &self.entries {
            let Some(hook) = entry.instance.lifecycle() else {
                report.skipped += 1;
                continue;
            };
            let agent = entry.local_name.as_str();
            tracing::debug!(agent, "cleaning up agent");

            let Some(result) = guarded_cleanup(hook, deadline).await else {
                tracing::error!(agent, "agent cleanup timed out, abandoning it");
                report.timed_out.push(agent.to_string());
                continue;
            };

            match result {
                Ok(()) => report.cleaned.push(agent.to_string()),
                Err(e) => {
                    tracing::error!(agent, error = %e, "agent cleanup failed");
                    report.failures.push(CleanupFailure {
                        local_name: agent.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

/// Run one cleanup hook, turning a panic into [`AgentError::Panicked`].
/// `None` when it has not finished by `deadline`.
pub(crate) async fn guarded_cleanup(
    hook: &dyn CleanupCapable,
    deadline: tokio::time::Instant,
) -> Option<Result<(), AgentError>> {
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| hook.cleanup())) {
        Ok(fut) => fut,
        Err(panic) => return Some(Err(AgentError::from_panic(panic))),
    };
    match tokio::time::timeout_at(deadline, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(result)) => Some(result),
        Ok(Err(panic)) => Some(Err(AgentError::from_panic(panic))),
        Err(_) => None,
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// A cleanup that returned an error or panicked.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupFailure {
    pub local_name: String,
    pub message: String,
}

/// Outcome of [`AgentRegistry::cleanup_all`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Agents whose cleanup completed.
    pub cleaned: Vec<String>,
    pub failures: Vec<CleanupFailure>,
    /// Agents whose cleanup was abandoned at the deadline.
    pub timed_out: Vec<String>,
    /// Agents without a cleanup hook.
    pub skipped: usize,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.timed_out.is_empty()
    }

    pub fn hit_deadline(&self) -> bool {
        !self.timed_out.is_empty()
    }
}

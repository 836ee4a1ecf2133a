//! Lifecycle controller: ordered startup and fault-tolerant shutdown.
//!
//! ```text
//! Idle → Discovering → Loading → Active → ShuttingDown → Stopped
//! ```
//!
//! No transition skips a state. The controller owns the [`AgentRegistry`]
//! once startup has finished and is the only component that triggers mass
//! cleanup. Shutdown runs at most once; later calls are reported as
//! [`ShutdownOutcome::AlreadyShuttingDown`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use axum::Router;
use serde::{Deserialize, Serialize};

use crate::discovery::{self, DiscoveryAnomaly};
use crate::error::{HostResult, LifecycleError, LoadError};
use crate::loader::{AgentLoader, LoadedAgent};
use crate::registry::{AgentRegistry, CleanupReport};

/// Stand-in deadline for timeouts too large for the clock (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Discovering,
    Loading,
    Active,
    ShuttingDown,
    Stopped,
}

impl LifecycleState {
    /// The only state reachable from `self`.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Discovering),
            Self::Discovering => Some(Self::Loading),
            Self::Loading => Some(Self::Active),
            Self::Active => Some(Self::ShuttingDown),
            Self::ShuttingDown => Some(Self::Stopped),
            Self::Stopped => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Loading => "loading",
            Self::Active => "active",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything startup produced.
pub struct Startup {
    /// Router holding every agent mount. Merge it into the host router.
    pub router: Router,
    pub registry: Arc<AgentRegistry>,
    pub loaded: Vec<LoadedAgent>,
    pub failures: Vec<LoadError>,
    pub anomalies: Vec<DiscoveryAnomaly>,
}

#[derive(Debug)]
pub enum ShutdownOutcome {
    Completed(CleanupReport),
    AlreadyShuttingDown,
}

pub struct LifecycleController {
    agents_dir: PathBuf,
    loader: AgentLoader,
    shutdown_timeout: Duration,
    state: RwLock<LifecycleState>,
    registry: OnceLock<Arc<AgentRegistry>>,
    shutting_down: AtomicBool,
}

impl LifecycleController {
    pub fn new(agents_dir: impl Into<PathBuf>, loader: AgentLoader, shutdown_timeout: Duration) -> Self {
        Self {
            agents_dir: agents_dir.into(),
            loader,
            shutdown_timeout,
            state: RwLock::new(LifecycleState::Idle),
            registry: OnceLock::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read().expect("lifecycle state lock poisoned")
    }

    pub fn agents_dir(&self) -> &Path {
        &self.agents_dir
    }

    /// The registry, once startup has completed.
    pub fn registry(&self) -> Option<Arc<AgentRegistry>> {
        self.registry.get().cloned()
    }

    fn transition(&self, to: LifecycleState) -> Result<(), LifecycleError> {
        let mut state = self.state.write().expect("lifecycle state lock poisoned");
        if state.next() != Some(to) {
            return Err(LifecycleError::InvalidTransition {
                from: state.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(from = state.as_str(), to = to.as_str(), "lifecycle transition");
        *state = to;
        Ok(())
    }

    /// Discover and load every agent, then become `Active`.
    ///
    /// Per-agent failures are logged and returned in [`Startup::failures`];
    /// only an unreadable agents directory is fatal.
    pub async fn start(&self) -> HostResult<Startup> {
        self.transition(LifecycleState::Discovering)?;
        let discovery = discovery::scan(&self.agents_dir)?;
        tracing::info!(
            root = %self.agents_dir.display(),
            found = discovery.records.len(),
            skipped = discovery.anomalies.len(),
            "agent discovery complete"
        );

        self.transition(LifecycleState::Loading)?;
        let mut router = Router::new();
        let mut registry = AgentRegistry::new();
        let summary = self
            .loader
            .load_all(&discovery.records, &mut router, &mut registry)
            .await;

        let registry = Arc::new(registry);
        let _ = self.registry.set(Arc::clone(&registry));
        self.transition(LifecycleState::Active)?;

        tracing::info!(
            loaded = summary.loaded.len(),
            failed = summary.failures.len(),
            "agents active"
        );

        Ok(Startup {
            router,
            registry,
            loaded: summary.loaded,
            failures: summary.failures,
            anomalies: discovery.anomalies,
        })
    }

    /// Clean up every agent, bounded by the shutdown timeout.
    pub async fn shutdown(&self) -> Result<ShutdownOutcome, LifecycleError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("shutdown already in progress, ignoring");
            return Ok(ShutdownOutcome::AlreadyShuttingDown);
        }
        if let Err(e) = self.transition(LifecycleState::ShuttingDown) {
            self.shutting_down.store(false, Ordering::SeqCst);
            return Err(e);
        }

        tracing::info!(timeout = ?self.shutdown_timeout, "shutting down agents");
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(self.shutdown_timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let report = match self.registry.get() {
            Some(registry) => registry.cleanup_all(deadline).await,
            None => CleanupReport::default(),
        };

        if report.is_clean() {
            tracing::info!(cleaned = report.cleaned.len(), "agent cleanup complete");
        } else {
            tracing::error!(
                cleaned = report.cleaned.len(),
                failed = report.failures.len(),
                timed_out = report.timed_out.len(),
                "agent cleanup finished with errors"
            );
        }

        self.transition(LifecycleState::Stopped)?;
        Ok(ShutdownOutcome::Completed(report))
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("agents_dir", &self.agents_dir)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Resolve on the first of SIGINT, SIGTERM or SIGHUP (Ctrl-C elsewhere).
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let wait_for = |kind: SignalKind| async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register signal handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT"),
            _ = wait_for(SignalKind::terminate()) => tracing::info!("received SIGTERM"),
            _ = wait_for(SignalKind::hangup()) => tracing::info!("received SIGHUP"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("received ctrl-c");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::agent::AgentCatalog;
    use crate::manifest::MANIFEST_FILE;

    fn controller(dir: &Path) -> LifecycleController {
        LifecycleController::new(
            dir,
            AgentLoader::new(AgentCatalog::builtin()),
            Duration::from_secs(2),
        )
    }

    fn write_agent(root: &Path, local: &str, name: &str, factory: &str) {
        let dir = root.join(local);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), format!(r#"{{"name": "{name}"}}"#)).unwrap();
        std::fs::write(dir.join("entry.toml"), format!("factory = \"{factory}\"")).unwrap();
    }

    #[test]
    fn states_advance_in_order() {
        let order = [
            LifecycleState::Idle,
            LifecycleState::Discovering,
            LifecycleState::Loading,
            LifecycleState::Active,
            LifecycleState::ShuttingDown,
            LifecycleState::Stopped,
        ];
        for pair in order.windows(2) {
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(LifecycleState::Stopped.next(), None);
        assert_eq!(LifecycleState::ShuttingDown.to_string(), "shutting_down");
    }

    #[tokio::test]
    async fn empty_root_becomes_active() {
        let tmp = TempDir::new().unwrap();
        let ctl = controller(&tmp.path().join("missing"));

        let startup = ctl.start().await.unwrap();
        assert!(startup.registry.is_empty());
        assert_eq!(ctl.state(), LifecycleState::Active);

        let outcome = ctl.shutdown().await.unwrap();
        assert!(matches!(outcome, ShutdownOutcome::Completed(ref r) if r.is_clean()));
        assert_eq!(ctl.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn start_only_from_idle() {
        let tmp = TempDir::new().unwrap();
        let ctl = controller(tmp.path());
        ctl.start().await.unwrap();
        assert!(ctl.start().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_before_start_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let ctl = controller(tmp.path());
        assert!(matches!(
            ctl.shutdown().await,
            Err(LifecycleError::InvalidTransition { .. })
        ));
        assert_eq!(ctl.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn shutdown_runs_once() {
        let tmp = TempDir::new().unwrap();
        write_agent(tmp.path(), "beat", "beat", "heartbeat");
        write_agent(tmp.path(), "echo", "echo", "echo");

        let ctl = controller(tmp.path());
        let startup = ctl.start().await.unwrap();
        assert_eq!(startup.loaded.len(), 2);

        let first = ctl.shutdown().await.unwrap();
        let ShutdownOutcome::Completed(report) = first else {
            panic!("first shutdown should complete");
        };
        assert_eq!(report.cleaned, vec!["beat"]);
        assert_eq!(report.skipped, 1);

        assert!(matches!(
            ctl.shutdown().await.unwrap(),
            ShutdownOutcome::AlreadyShuttingDown
        ));
    }

    #[tokio::test]
    async fn concurrent_shutdowns_clean_up_once() {
        let tmp = TempDir::new().unwrap();
        write_agent(tmp.path(), "beat", "beat", "heartbeat");

        let ctl = Arc::new(controller(tmp.path()));
        ctl.start().await.unwrap();

        let (a, b) = tokio::join!(ctl.shutdown(), ctl.shutdown());
        let completed = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(|o| matches!(o, ShutdownOutcome::Completed(_)))
            .count();
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn unreadable_root_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("agents");
        std::fs::write(&file, "").unwrap();
        assert!(controller(&file).start().await.is_err());
    }

    #[tokio::test]
    async fn oversized_shutdown_timeout_still_cleans_up() {
        let tmp = TempDir::new().unwrap();
        write_agent(tmp.path(), "beat", "beat", "heartbeat");

        let ctl = LifecycleController::new(
            tmp.path(),
            AgentLoader::new(AgentCatalog::builtin()),
            Duration::from_secs(u64::MAX),
        );
        ctl.start().await.unwrap();

        let ShutdownOutcome::Completed(report) = ctl.shutdown().await.unwrap() else {
            panic!("shutdown should complete");
        };
        assert_eq!(report.cleaned, vec!["beat"]);
        assert!(!report.hit_deadline());
        assert_eq!(ctl.state(), LifecycleState::Stopped);
    }
}

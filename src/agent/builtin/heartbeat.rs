//! `heartbeat`: a background-only agent.
//!
//! It has no HTTP surface. On construction it spawns a task that ticks every
//! `intervalMs` milliseconds; cleanup stops the task and waits for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::parse_config;
use crate::agent::{Agent, CleanupCapable};
use crate::error::AgentError;

/// Catalog key.
pub const FACTORY: &str = "heartbeat";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatConfig {
    #[serde(default = "default_interval_ms")]
    interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    30_000
}

pub struct HeartbeatAgent {
    ticks: Arc<AtomicU64>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatAgent {
    /// Start ticking. Requires a running tokio runtime.
    pub fn new(config: &serde_json::Value) -> Result<Self, AgentError> {
        let config: HeartbeatConfig = parse_config(config)?;
        if config.interval_ms == 0 {
            return Err(AgentError::InvalidConfig {
                message: "intervalMs must be greater than zero".into(),
            });
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|e| AgentError::Runtime {
            message: format!("heartbeat needs a tokio runtime: {e}"),
        })?;

        let ticks = Arc::new(AtomicU64::new(0));
        let (stop, stopped) = watch::channel(false);
        let task = handle.spawn(run(
            Duration::from_millis(config.interval_ms),
            Arc::clone(&ticks),
            stopped,
        ));

        Ok(Self {
            ticks,
            stop,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("heartbeat task lock poisoned")
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

pub fn create(config: &serde_json::Value) -> Result<Arc<dyn Agent>, AgentError> {
    Ok(Arc::new(HeartbeatAgent::new(config)?))
}

async fn run(period: Duration, ticks: Arc<AtomicU64>, mut stopped: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let n = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(ticks = n, "heartbeat");
            }
            changed = stopped.changed() => {
                if changed.is_err() || *stopped.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("heartbeat task stopped");
}

impl Agent for HeartbeatAgent {
    fn lifecycle(&self) -> Option<&dyn CleanupCapable> {
        Some(self)
    }
}

impl CleanupCapable for HeartbeatAgent {
    fn cleanup(&self) -> BoxFuture<'_, Result<(), AgentError>> {
        Box::pin(async move {
            let _ = self.stop.send(true);
            let task = self
                .task
                .lock()
                .expect("heartbeat task lock poisoned")
                .take();
            if let Some(task) = task {
                task.await.map_err(|e| AgentError::Runtime {
                    message: format!("heartbeat task failed: {e}"),
                })?;
            }
            Ok(())
        })
    }
}

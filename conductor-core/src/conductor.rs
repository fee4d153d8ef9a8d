use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

use crate::config::ConductorConfig;
use crate::context::ContextProvider;
use crate::error::Result;
use crate::registry::ReactionRegistry;
use crate::source::MessageSource;
use crate::worker::{ConductorStats, DispatchLoop, StatsCounters, WorkerState};

struct Worker {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Serializes change notifications onto the registered reaction stages.
///
/// One conductor owns exactly one worker task. The worker receives a
/// message, establishes the tenant/principal context, runs every registered
/// stage in order and clears the context before it receives again. Stage
/// execution for two notifications therefore never overlaps, which is the
/// only protection the stages get against concurrent modification of the
/// resources they touch.
pub struct EventConductor {
    config: ConductorConfig,
    source: Arc<dyn MessageSource>,
    registry: ReactionRegistry,
    context: Arc<dyn ContextProvider>,
    stats: Arc<StatsCounters>,
    state: Arc<watch::Sender<WorkerState>>,
    worker: Mutex<Option<Worker>>,
}

impl fmt::Debug for EventConductor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_running = self
            .worker
            .try_lock()
            .map(|guard| guard.is_some())
            .unwrap_or(true);

        f.debug_struct("EventConductor")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("state", &*self.state.borrow())
            .field("worker_running", &worker_running)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl EventConductor {
    pub fn new(
        config: ConductorConfig,
        source: Arc<dyn MessageSource>,
        registry: ReactionRegistry,
        context: Arc<dyn ContextProvider>,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Stopped);
        Self {
            config,
            source,
            registry,
            context,
            stats: Arc::new(StatsCounters::default()),
            state: Arc::new(state),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Handle to the stage list; mutations apply from the next notification.
    pub fn registry(&self) -> &ReactionRegistry {
        &self.registry
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ConductorStats {
        self.stats.snapshot()
    }

    /// Spawn the worker and wait until it is listening. Calling this while
    /// the worker runs does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.worker.lock().await;

        if let Some(worker) = guard.as_ref() {
            if !worker.handle.is_finished() {
                debug!(target: "conductor::worker", "conductor already started");
                return Ok(());
            }
            warn!(target: "conductor::worker", "previous worker exited unexpectedly; restarting");
            if let Some(stale) = guard.take() {
                if let Err(err) = stale.handle.await {
                    warn!(target: "conductor::worker", error = %err, "previous worker terminated abnormally");
                }
            }
        }

        info!(target: "conductor::worker", queue = %self.config.queue_id, "activating event conductor");
        self.state.send_replace(WorkerState::Starting);

        let shutdown = CancellationToken::new();
        let dispatch = DispatchLoop {
            config: self.config.clone(),
            source: Arc::clone(&self.source),
            registry: self.registry.clone(),
            context: Arc::clone(&self.context),
            stats: Arc::clone(&self.stats),
            state: Arc::clone(&self.state),
        };
        let handle = tokio::spawn(dispatch.run(shutdown.clone()).with_current_subscriber());

        *guard = Some(Worker { shutdown, handle });
        drop(guard);

        // `self.state` keeps the sender alive, so this only returns once the
        // worker has left `Starting`.
        let mut state = self.state.subscribe();
        state
            .wait_for(|s| !matches!(s, WorkerState::Starting))
            .await
            .ok();
        Ok(())
    }

    /// Cancel a pending receive and wait for the worker to exit. A stage that
    /// is already running is allowed to finish first. Calling this while
    /// stopped does nothing.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.worker.lock().await;
        let Some(worker) = guard.take() else {
            debug!(target: "conductor::worker", "conductor not running");
            return Ok(());
        };

        info!(target: "conductor::worker", queue = %self.config.queue_id, "deactivating event conductor");
        self.state.send_replace(WorkerState::Stopping);
        worker.shutdown.cancel();

        let joined = worker.handle.await;
        self.state.send_replace(WorkerState::Stopped);
        drop(guard);

        joined?;
        Ok(())
    }
}

impl Drop for EventConductor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.shutdown.cancel();
        }
    }
}

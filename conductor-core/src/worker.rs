//! The conductor's single dispatch loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info, trace};

use crate::config::ConductorConfig;
use crate::context::{ContextProvider, ContextScope, ProcessingContext};
use crate::error::{ConductorError, Result};
use crate::notification::{Notification, NotificationKind, RawMessage};
use crate::registry::ReactionRegistry;
use crate::source::MessageSource;
use crate::throttle::EmptyReceiveThrottle;

/// Lifecycle of the conductor's worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Starting => "starting",
            WorkerState::Listening => "listening",
            WorkerState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time counters for a conductor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConductorStats {
    /// Messages handed out by the source.
    pub received: u64,
    /// Notifications for which every stage ran successfully.
    pub dispatched: u64,
    /// Notifications discarded because their kind is not handled.
    pub filtered: u64,
    /// Notifications abandoned after a decode error, stage failure or panic.
    pub failed: u64,
    /// Receives that produced nothing.
    pub empty_receives: u64,
    /// Receives that failed with a transport error or panicked.
    pub transport_errors: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    received: AtomicU64,
    dispatched: AtomicU64,
    filtered: AtomicU64,
    failed: AtomicU64,
    empty_receives: AtomicU64,
    transport_errors: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConductorStats {
        ConductorStats {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            empty_receives: self.empty_receives.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }
}

enum DispatchOutcome {
    Applied { stages: usize },
    Filtered(NotificationKind),
}

/// Everything the worker task owns while it runs.
pub(crate) struct DispatchLoop {
    pub(crate) config: ConductorConfig,
    pub(crate) source: Arc<dyn MessageSource>,
    pub(crate) registry: ReactionRegistry,
    pub(crate) context: Arc<dyn ContextProvider>,
    pub(crate) stats: Arc<StatsCounters>,
    pub(crate) state: Arc<watch::Sender<WorkerState>>,
}

impl DispatchLoop {
    /// Receive and dispatch until `shutdown` is cancelled. Nothing that
    /// happens while processing a single notification ends the loop.
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        let queue = self.config.queue_id.clone();
        let mut throttle = EmptyReceiveThrottle::new(self.config.empty_receive_log_interval);
        let mut sequence: u64 = 0;

        // A racing stop() may already have moved the state to Stopping.
        self.state.send_if_modified(|state| {
            if *state == WorkerState::Starting {
                *state = WorkerState::Listening;
                true
            } else {
                false
            }
        });
        info!(target: "conductor::worker", queue = %queue, "starting to listen for notifications");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    trace!(target: "conductor::worker", queue = %queue, "receive cancelled by shutdown");
                    break;
                }
                received = AssertUnwindSafe(self.source.receive(&queue)).catch_unwind() => received,
            };

            match received {
                Ok(Ok(Some(raw))) => {
                    throttle.reset();
                    sequence += 1;
                    StatsCounters::bump(&self.stats.received);
                    self.process(raw, sequence).await;
                }
                Ok(Ok(None)) => {
                    StatsCounters::bump(&self.stats.empty_receives);
                    if throttle.record() {
                        error!(
                            target: "conductor::worker",
                            queue = %queue,
                            consecutive = throttle.consecutive(),
                            "problem while receiving notifications: message is empty, the transport connection is probably down"
                        );
                    }
                    self.idle(&shutdown).await;
                }
                Ok(Err(err)) => {
                    StatsCounters::bump(&self.stats.transport_errors);
                    if throttle.record() {
                        error!(
                            target: "conductor::worker",
                            queue = %queue,
                            consecutive = throttle.consecutive(),
                            error = %err,
                            "problem while receiving notifications"
                        );
                    }
                    self.idle(&shutdown).await;
                }
                Err(panic) => {
                    StatsCounters::bump(&self.stats.transport_errors);
                    if throttle.record() {
                        error!(
                            target: "conductor::worker",
                            queue = %queue,
                            consecutive = throttle.consecutive(),
                            panic = panic_message(panic.as_ref()),
                            "unexpected panic while receiving notifications"
                        );
                    }
                    self.idle(&shutdown).await;
                }
            }
        }

        info!(target: "conductor::worker", queue = %queue, "stopped listening for notifications");
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        let backoff = self.config.idle_backoff();
        if backoff.is_zero() {
            // Keeps a source that is permanently empty from starving the runtime.
            tokio::task::yield_now().await;
            return;
        }
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(backoff) => {}
        }
    }

    /// Processes one message to completion. Errors and panics are logged and
    /// swallowed here.
    async fn process(&self, raw: RawMessage, sequence: u64) {
        let span = debug_span!(target: "conductor::worker", "dispatch", sequence);
        let outcome = AssertUnwindSafe(self.dispatch(raw, sequence).instrument(span))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(DispatchOutcome::Applied { stages })) => {
                StatsCounters::bump(&self.stats.dispatched);
                debug!(target: "conductor::worker", sequence, stages, "notification dispatched");
            }
            Ok(Ok(DispatchOutcome::Filtered(kind))) => {
                StatsCounters::bump(&self.stats.filtered);
                debug!(target: "conductor::worker", sequence, kind = %kind, "notification kind not handled; discarded");
            }
            // Already logged with the notification's details.
            Ok(Err(ConductorError::Stage { .. })) => {
                StatsCounters::bump(&self.stats.failed);
            }
            Ok(Err(err)) => {
                StatsCounters::bump(&self.stats.failed);
                error!(target: "conductor::worker", sequence, error = %err, "problem while processing notification; skipping");
            }
            Err(panic) => {
                StatsCounters::bump(&self.stats.failed);
                error!(
                    target: "conductor::worker",
                    sequence,
                    panic = panic_message(panic.as_ref()),
                    "unexpected panic while processing notification; skipping"
                );
            }
        }
    }

    async fn dispatch(&self, raw: RawMessage, sequence: u64) -> Result<DispatchOutcome> {
        let notification = Notification::decode(&raw, sequence)?;

        // Dropped on every exit path below, including unwinding.
        let _scope = ContextScope::enter(
            self.context.as_ref(),
            ProcessingContext::for_notification(&notification),
        );

        if !self.config.handles(notification.kind) {
            return Ok(DispatchOutcome::Filtered(notification.kind));
        }

        let stages = self.registry.current_stages();
        for stage in stages.iter() {
            trace!(target: "conductor::worker", sequence, stage = stage.name(), "applying stage");
            if let Err(source) = stage.apply(&notification).await {
                error!(
                    target: "conductor::worker",
                    sequence,
                    stage = stage.name(),
                    organization = %notification.organization,
                    principal = %notification.principal,
                    resource = %notification.resource_id,
                    kind = %notification.kind,
                    error = %source,
                    "reaction stage failed; skipping remaining stages for this notification"
                );
                return Err(ConductorError::Stage {
                    stage: stage.name().to_string(),
                    source,
                });
            }
        }

        Ok(DispatchOutcome::Applied {
            stages: stages.len(),
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

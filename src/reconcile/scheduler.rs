//! The background task that replays the fallback queue into the datastore.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::sink::EventSink;
use crate::spool::{DrainError, DrainReport, FallbackQueue};
use crate::types::HostName;

use super::state::{ReconcileState, StateCell};

/// Fixed delay before each drain attempt.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Shared {
    state: StateCell,
    wake: Notify,
    drain_attempts: AtomicU64,
}

/// Cheap, cloneable control handle for a running [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcilerHandle {
    shared: Arc<Shared>,
}

impl ReconcilerHandle {
    /// Requests a reconciliation pass one interval from now.
    ///
    /// Only has an effect when the reconciler is idle; while a retry sequence
    /// is already armed, waiting or draining this is a no-op. Returns true if
    /// this call armed the reconciler.
    pub fn arm(&self) -> bool {
        let armed = self.shared.state.try_arm();
        if armed {
            debug!("Reconciler armed");
            self.shared.wake.notify_one();
        }
        armed
    }

    /// Returns the current state.
    pub fn state(&self) -> ReconcileState {
        self.shared.state.get()
    }

    /// Returns how many drain passes have been started so far.
    pub fn drain_attempts(&self) -> u64 {
        self.shared.drain_attempts.load(Ordering::SeqCst)
    }
}

/// Owns the single retry sequence for the fallback queue.
///
/// The reconciler sleeps until armed, waits one interval, and drains the
/// queue. A failed drain passes through `Waiting` and re-arms with a fresh
/// timer, so it is retried after the same fixed interval, forever, until it
/// succeeds or the shutdown token is cancelled.
pub struct Reconciler<S> {
    queue: Arc<FallbackQueue>,
    sink: Arc<S>,
    host: HostName,
    interval: Duration,
    shared: Arc<Shared>,
}

impl<S: EventSink + 'static> Reconciler<S> {
    /// Creates an idle reconciler using [`RETRY_INTERVAL`].
    pub fn new(queue: Arc<FallbackQueue>, sink: Arc<S>, host: HostName) -> Self {
        Reconciler {
            queue,
            sink,
            host,
            interval: RETRY_INTERVAL,
            shared: Arc::new(Shared {
                state: StateCell::new(),
                wake: Notify::new(),
                drain_attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Overrides the retry interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns a handle for arming and observing this reconciler.
    pub fn handle(&self) -> ReconcilerHandle {
        ReconcilerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawns the reconciler on the current tokio runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> (ReconcilerHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run(shutdown));
        (handle, task)
    }

    /// Runs the reconciler until `shutdown` is cancelled.
    ///
    /// Cancellation is observed while idle and while a timer is pending. A
    /// drain pass that has already started runs to completion first, so the
    /// queue file is never abandoned half-rewritten.
    #[instrument(skip_all, fields(queue = %self.queue.path().display()))]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Reconciler started");

        'idle: loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'idle,
                _ = self.shared.wake.notified() => {}
            }

            if self.shared.state.get() != ReconcileState::Armed {
                continue;
            }

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break 'idle,
                    _ = tokio::time::sleep(self.interval) => {}
                }

                self.shared.state.set(ReconcileState::Draining);
                self.shared.drain_attempts.fetch_add(1, Ordering::SeqCst);

                match self.drain_once().await {
                    Ok(report) if report.appended_during_drain => {
                        debug!("Events were spooled during the drain, staying armed");
                        self.shared.state.set(ReconcileState::Armed);
                    }
                    Ok(_) => {
                        if self.settle_after_drain().await {
                            continue;
                        }
                        continue 'idle;
                    }
                    Err(e) => {
                        self.shared.state.set(ReconcileState::Waiting);
                        warn!(
                            error = %e,
                            retry_in_secs = self.interval.as_secs(),
                            "Fallback queue drain failed, will retry"
                        );
                        // The timer restarts at the top of the loop.
                        self.shared.state.set(ReconcileState::Armed);
                    }
                }
            }
        }

        self.shared.state.set(ReconcileState::Idle);
        info!("Reconciler stopped");
    }

    /// Returns to `Idle` after a clean drain, re-arming if the queue is not
    /// empty.
    ///
    /// An append that lands after the drain released the queue lock but before
    /// the state left `Draining` could not arm the reconciler itself. Returns
    /// true if the reconciler was re-armed here.
    async fn settle_after_drain(&self) -> bool {
        self.shared.state.set(ReconcileState::Idle);

        let backlog = match self.queue.is_empty().await {
            Ok(empty) => !empty,
            Err(e) => {
                warn!(error = %e, "Cannot inspect fallback queue after drain");
                false
            }
        };
        if backlog && self.shared.state.try_arm() {
            debug!("Events were spooled as the drain finished, re-armed");
            return true;
        }
        false
    }

    async fn drain_once(&self) -> Result<DrainReport, DrainError> {
        let sink = &*self.sink;
        let host = &self.host;
        self.queue
            .drain(move |record| sink.insert(record.at, host, record.kind))
            .await
    }
}

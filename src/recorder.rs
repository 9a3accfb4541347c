//! Deduplicating event recorder.
//!
//! The recorder is the only consumer of transition signals. It guarantees
//! that two consecutive recorded events never share a kind, writes each
//! surviving event to the datastore, and falls back to the local queue (and
//! arms the reconciler) when the datastore write fails.
//!
//! Deduplication state lives in memory only. After a restart the first signal
//! is always recorded, even if it repeats the last one persisted before.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::reconcile::ReconcilerHandle;
use crate::sink::EventSink;
use crate::spool::FallbackQueue;
use crate::types::{HostName, TransitionSignal, UptimeEvent};

/// What happened to a signal passed to [`Recorder::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Same kind as the last recorded event; nothing persisted.
    Duplicate,
    /// Written to the datastore.
    Inserted,
    /// Datastore write failed; appended to the fallback queue.
    Spooled,
    /// Datastore write and queue append both failed; the event is lost.
    Dropped,
}

/// Records transition signals, collapsing consecutive duplicates.
pub struct Recorder<S> {
    sink: Arc<S>,
    queue: Arc<FallbackQueue>,
    reconciler: ReconcilerHandle,
    host: HostName,
    last_recorded: Option<TransitionSignal>,
}

impl<S: EventSink> Recorder<S> {
    pub fn new(
        sink: Arc<S>,
        queue: Arc<FallbackQueue>,
        reconciler: ReconcilerHandle,
        host: HostName,
    ) -> Self {
        Recorder {
            sink,
            queue,
            reconciler,
            host,
            last_recorded: None,
        }
    }

    /// The kind of the last event that was recorded, if any.
    pub fn last_recorded(&self) -> Option<TransitionSignal> {
        self.last_recorded
    }

    /// Records one signal.
    ///
    /// The dedup state is updated as soon as the event is handed to either the
    /// datastore or the queue, even if the queue append itself failed: the
    /// local observation is trusted while the durable commit is deferred.
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn record(&mut self, signal: TransitionSignal) -> RecordOutcome {
        if self.last_recorded == Some(signal) {
            debug!(kind = %signal, "Ignoring duplicate transition");
            return RecordOutcome::Duplicate;
        }

        let event = UptimeEvent::now(self.host.clone(), signal);

        let outcome = match self.sink.insert(event.at, &event.host, event.kind).await {
            Ok(()) => {
                info!(kind = %signal, at = %event.at.to_rfc3339(), "Event recorded in datastore");
                RecordOutcome::Inserted
            }
            Err(e) => {
                warn!(kind = %signal, error = %e, "Datastore write failed, spooling locally");
                let outcome = match self.queue.append(&event).await {
                    Ok(_) => {
                        info!(
                            kind = %signal,
                            at = %event.at.to_rfc3339(),
                            queue = %self.queue.path().display(),
                            "Event spooled"
                        );
                        RecordOutcome::Spooled
                    }
                    Err(e) => {
                        error!(kind = %signal, error = %e, "Cannot spool event, dropping it");
                        RecordOutcome::Dropped
                    }
                };
                self.reconciler.arm();
                outcome
            }
        };

        self.last_recorded = Some(signal);
        outcome
    }

    /// Records every signal received on `rx` until the channel closes.
    ///
    /// If `shutdown` is cancelled first, the channel is closed to new signals
    /// and the ones already buffered are still recorded before returning.
    #[instrument(skip_all, fields(host = %self.host))]
    pub async fn run(mut self, mut rx: mpsc::Receiver<TransitionSignal>, shutdown: CancellationToken) {
        info!("Recorder started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Shutdown requested, flushing buffered signals");
                    rx.close();
                    while let Some(signal) = rx.recv().await {
                        self.record(signal).await;
                    }
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(signal) => {
                        self.record(signal).await;
                    }
                    None => {
                        debug!("Signal channel closed");
                        break;
                    }
                },
            }
        }

        info!(last = ?self.last_recorded, "Recorder stopped");
    }
}

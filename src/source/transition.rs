//! Transition source lifecycle.
//!
//! The source owns a [`NotificationBackend`] and, while running, a dedicated
//! OS thread that polls it. Each notification that maps to a
//! [`TransitionSignal`] is pushed into a bounded channel consumed by the
//! recorder. The thread never touches the datastore or the queue.

use std::sync::mpsc as std_mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::{NotificationBackend, SourceError};
use crate::types::TransitionSignal;

/// How often the receive thread checks for cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(150);

enum SourceState<B> {
    /// `None` only after the receive thread panicked with the backend.
    Stopped(Option<B>),
    Running {
        cancel: CancellationToken,
        thread: JoinHandle<B>,
    },
}

/// Produces transition signals from OS notifications.
pub struct TransitionSource<B> {
    state: Mutex<SourceState<B>>,
    signals: mpsc::Sender<TransitionSignal>,
}

impl<B: NotificationBackend> TransitionSource<B> {
    pub fn new(backend: B, signals: mpsc::Sender<TransitionSignal>) -> Self {
        TransitionSource {
            state: Mutex::new(SourceState::Stopped(Some(backend))),
            signals,
        }
    }

    /// Whether the receive thread is running.
    ///
    /// A thread that ended on its own (the notification stream closed or
    /// failed) is reaped here and reported as stopped.
    pub fn is_running(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        reap_finished(&mut state);
        matches!(*state, SourceState::Running { .. })
    }

    /// Registers the backend and starts forwarding signals.
    ///
    /// Calling `start` on a running source does nothing. A source whose
    /// stream ended on its own counts as stopped and registers again. If
    /// registration fails the source stays stopped and nothing remains
    /// registered.
    pub fn start(&self) -> Result<(), SourceError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        reap_finished(&mut state);

        let backend = match &mut *state {
            SourceState::Running { .. } => {
                debug!("Transition source already running");
                return Ok(());
            }
            SourceState::Stopped(backend) => backend.take().ok_or(SourceError::BackendLost)?,
        };
        let name = backend.name();

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let thread = {
            let cancel = cancel.clone();
            let signals = self.signals.clone();
            std::thread::Builder::new()
                .name(format!("transition-source-{name}"))
                .spawn(move || receive_loop(backend, signals, cancel, ready_tx))
                .map_err(SourceError::Thread)?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(backend = name, "Transition source started");
                *state = SourceState::Running { cancel, thread };
                Ok(())
            }
            Ok(Err(e)) => {
                *state = SourceState::Stopped(thread.join().ok());
                Err(e)
            }
            Err(_) => {
                *state = SourceState::Stopped(thread.join().ok());
                Err(SourceError::BackendLost)
            }
        }
    }

    /// Stops forwarding signals and unregisters the backend.
    ///
    /// Blocks until the receive thread exits. Stopping a source that is not
    /// running does nothing.
    pub fn stop(&self) -> Result<(), SourceError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        reap_finished(&mut state);

        let SourceState::Running { cancel, .. } = &*state else {
            return Ok(());
        };
        cancel.cancel();

        let previous = std::mem::replace(&mut *state, SourceState::Stopped(None));
        let SourceState::Running { thread, .. } = previous else {
            return Ok(());
        };

        match thread.join() {
            Ok(backend) => {
                info!(backend = backend.name(), "Transition source stopped");
                *state = SourceState::Stopped(Some(backend));
                Ok(())
            }
            Err(_) => {
                warn!("Transition source thread panicked");
                Err(SourceError::BackendLost)
            }
        }
    }
}

impl<B> Drop for TransitionSource<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let SourceState::Running { cancel, .. } = state {
            cancel.cancel();
        }
    }
}

/// Moves a `Running` state whose thread already exited back to `Stopped`,
/// recovering the backend.
fn reap_finished<B: NotificationBackend>(state: &mut SourceState<B>) {
    if !matches!(state, SourceState::Running { thread, .. } if thread.is_finished()) {
        return;
    }
    let SourceState::Running { thread, .. } =
        std::mem::replace(state, SourceState::Stopped(None))
    else {
        return;
    };
    match thread.join() {
        Ok(backend) => {
            warn!(backend = backend.name(), "Notification stream ended, transition source stopped");
            *state = SourceState::Stopped(Some(backend));
        }
        Err(_) => warn!("Transition source thread panicked"),
    }
}

fn receive_loop<B: NotificationBackend>(
    mut backend: B,
    signals: mpsc::Sender<TransitionSignal>,
    cancel: CancellationToken,
    ready: std_mpsc::SyncSender<Result<(), SourceError>>,
) -> B {
    if let Err(e) = backend.register() {
        backend.unregister();
        let _ = ready.send(Err(e));
        return backend;
    }
    if ready.send(Ok(())).is_err() {
        backend.unregister();
        return backend;
    }

    while !cancel.is_cancelled() {
        let notification = match backend.recv_timeout(POLL_INTERVAL) {
            Ok(Some(n)) => n,
            Ok(None) => continue,
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "Notification stream failed");
                break;
            }
        };

        let Some(signal) = notification.signal() else {
            debug!(backend = backend.name(), notification = %notification, "Ignoring notification");
            continue;
        };

        debug!(notification = %notification, kind = %signal, "Transition observed");
        if signals.blocking_send(signal).is_err() {
            debug!("Signal receiver closed");
            break;
        }
    }

    backend.unregister();
    backend
}

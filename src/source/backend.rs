//! The capability interface between the transition source and the OS.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use thiserror::Error;

use super::notification::RawNotification;

/// Errors raised by notification backends and the transition source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The backend could not register with the OS notification mechanism.
    #[error("{backend}: registration failed: {reason}")]
    Register {
        backend: &'static str,
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The notification stream ended unexpectedly.
    #[error("{backend}: notification stream closed")]
    Closed { backend: &'static str },

    /// The receive thread could not be spawned.
    #[error("cannot spawn notification thread: {0}")]
    Thread(#[source] io::Error),

    /// A previous receive thread panicked and took the backend with it.
    #[error("notification backend lost after a panic")]
    BackendLost,
}

/// Delivers OS notifications to the transition source.
///
/// The source moves the backend into its dedicated thread, calls
/// [`register`](Self::register) once, polls [`recv_timeout`](Self::recv_timeout)
/// until stopped, then calls [`unregister`](Self::unregister) before the
/// thread exits.
pub trait NotificationBackend: Send + 'static {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Registers with the OS. Must either fully succeed or leave nothing
    /// registered.
    fn register(&mut self) -> Result<(), SourceError>;

    /// Waits up to `timeout` for the next notification.
    ///
    /// Returns `Ok(None)` when the timeout elapses with nothing received.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RawNotification>, SourceError>;

    /// Releases the OS registration. Must be safe to call when not registered.
    fn unregister(&mut self);
}

/// In-process backend fed through a [`ChannelNotifier`].
///
/// Used to inject notifications that do not come from the OS, and as a
/// synthetic source when exercising the recording pipeline.
#[derive(Debug)]
pub struct ChannelBackend {
    rx: Receiver<RawNotification>,
    registered: Arc<AtomicBool>,
    registrations: Arc<AtomicUsize>,
    refuse_registration: bool,
}

/// Sending half of a [`ChannelBackend`].
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    /// Shared by every clone; `None` once the stream was closed.
    tx: Arc<Mutex<Option<Sender<RawNotification>>>>,
    registered: Arc<AtomicBool>,
    registrations: Arc<AtomicUsize>,
}

impl ChannelBackend {
    /// Creates a connected backend/notifier pair.
    pub fn pair() -> (Self, ChannelNotifier) {
        let (tx, rx) = mpsc::channel();
        let registered = Arc::new(AtomicBool::new(false));
        let registrations = Arc::new(AtomicUsize::new(0));
        (
            ChannelBackend {
                rx,
                registered: Arc::clone(&registered),
                registrations: Arc::clone(&registrations),
                refuse_registration: false,
            },
            ChannelNotifier {
                tx: Arc::new(Mutex::new(Some(tx))),
                registered,
                registrations,
            },
        )
    }

    /// Makes [`register`](NotificationBackend::register) fail.
    pub fn refusing_registration(mut self) -> Self {
        self.refuse_registration = true;
        self
    }
}

impl ChannelNotifier {
    /// Delivers a notification. Returns false if the backend is gone.
    pub fn notify(&self, notification: RawNotification) -> bool {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        tx.as_ref().is_some_and(|tx| tx.send(notification).is_ok())
    }

    /// Ends the notification stream for every clone, as if the OS side went
    /// away.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Whether the backend is currently registered.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// How many times the backend has registered successfully.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

impl NotificationBackend for ChannelBackend {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn register(&mut self) -> Result<(), SourceError> {
        if self.refuse_registration {
            return Err(SourceError::Register {
                backend: self.name(),
                reason: "registration refused".to_string(),
                source: None,
            });
        }
        self.registered.store(true, Ordering::SeqCst);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RawNotification>, SourceError> {
        match self.rx.recv_timeout(timeout) {
            Ok(n) => Ok(Some(n)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Closed {
                backend: self.name(),
            }),
        }
    }

    fn unregister(&mut self) {
        self.registered.store(false, Ordering::SeqCst);
    }
}

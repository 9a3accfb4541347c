//! OS-level notifications and their mapping to transition signals.

use std::fmt;

use crate::types::TransitionSignal;

/// A power, session or service-control notification as delivered by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawNotification {
    /// The host is about to suspend or hibernate.
    Suspend,
    /// The host resumed from suspend.
    Resume,
    /// The session was locked.
    Lock,
    /// The session was unlocked.
    Unlock,
    /// The host is shutting down.
    Shutdown,
    /// The recording service started.
    ServiceStart,
    /// The recording service is stopping.
    ServiceStop,
    /// Anything else the backend saw; carries its raw description.
    Unrecognized(String),
}

impl RawNotification {
    /// Maps the notification to a transition signal.
    ///
    /// Unrecognized notifications never produce a signal.
    pub fn signal(&self) -> Option<TransitionSignal> {
        match self {
            RawNotification::Resume | RawNotification::Unlock | RawNotification::ServiceStart => {
                Some(TransitionSignal::On)
            }
            RawNotification::Suspend
            | RawNotification::Lock
            | RawNotification::Shutdown
            | RawNotification::ServiceStop => Some(TransitionSignal::Off),
            RawNotification::Unrecognized(_) => None,
        }
    }
}

impl fmt::Display for RawNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawNotification::Suspend => f.write_str("suspend"),
            RawNotification::Resume => f.write_str("resume"),
            RawNotification::Lock => f.write_str("lock"),
            RawNotification::Unlock => f.write_str("unlock"),
            RawNotification::Shutdown => f.write_str("shutdown"),
            RawNotification::ServiceStart => f.write_str("service-start"),
            RawNotification::ServiceStop => f.write_str("service-stop"),
            RawNotification::Unrecognized(raw) => write!(f, "unrecognized({raw})"),
        }
    }
}

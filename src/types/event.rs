//! The uptime event persisted to the datastore or the fallback queue.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::ids::HostName;
use super::signal::TransitionSignal;

/// One recorded transition.
///
/// Events are created by the recorder once a signal survives deduplication and
/// are never mutated afterwards. The fallback queue keeps whole seconds only,
/// so an event read back from the queue has its sub-second part dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeEvent {
    /// Wall-clock time the signal was observed.
    pub at: DateTime<Utc>,
    /// Logical host identity.
    pub host: HostName,
    /// On or off.
    pub kind: TransitionSignal,
}

impl UptimeEvent {
    pub fn new(at: DateTime<Utc>, host: HostName, kind: TransitionSignal) -> Self {
        UptimeEvent { at, host, kind }
    }

    /// Creates an event stamped with the current time.
    pub fn now(host: HostName, kind: TransitionSignal) -> Self {
        Self::new(Utc::now(), host, kind)
    }

    /// Seconds since the Unix epoch, as stored in the fallback queue.
    pub fn unix_seconds(&self) -> i64 {
        self.at.timestamp()
    }
}

/// Converts stored Unix seconds back into a UTC timestamp.
///
/// Returns `None` for values outside chrono's representable range.
pub fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_seconds_truncates_subsecond_part() {
        let at = Utc.timestamp_opt(1_700_000_000, 750_000_000).unwrap();
        let event = UptimeEvent::new(at, HostName::new("h"), TransitionSignal::On);
        assert_eq!(event.unix_seconds(), 1_700_000_000);
    }

    #[test]
    fn from_unix_seconds_rejects_out_of_range() {
        assert!(from_unix_seconds(i64::MAX).is_none());
        assert_eq!(from_unix_seconds(0).unwrap().timestamp(), 0);
    }
}

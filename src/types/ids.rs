//! Newtype wrappers for identities written into every event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The logical host name stored in each event row.
///
/// This is the configured `hostname`, not necessarily the machine's
/// network name; several machines could share one on purpose.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostName(pub String);

impl HostName {
    pub fn new(s: impl Into<String>) -> Self {
        HostName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HostName {
    fn from(s: String) -> Self {
        HostName(s)
    }
}

impl From<&str> for HostName {
    fn from(s: &str) -> Self {
        HostName(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_name_serializes_transparently() {
        let host = HostName::new("desk-01");
        let json = serde_json::to_string(&host).unwrap();
        assert_eq!(json, "\"desk-01\"");

        let back: HostName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, host);
    }

    #[test]
    fn host_name_display_is_raw() {
        assert_eq!(HostName::from("lab").to_string(), "lab");
    }
}

//! The normalized on/off transition signal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether the host just became available (`On`) or unavailable (`Off`).
///
/// The wire token (queue lines, datastore `evt` column) is the lowercase
/// name: `on` or `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionSignal {
    On,
    Off,
}

impl TransitionSignal {
    /// Returns the wire token for this signal.
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionSignal::On => "on",
            TransitionSignal::Off => "off",
        }
    }
}

impl fmt::Display for TransitionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A token that is neither `on` nor `off`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transition kind: {0:?}")]
pub struct UnknownSignal(pub String);

impl FromStr for TransitionSignal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(TransitionSignal::On),
            "off" => Ok(TransitionSignal::Off),
            other => Err(UnknownSignal(other.to_string())),
        }
    }
}

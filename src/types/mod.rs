//! Core domain types.

pub mod event;
pub mod ids;
pub mod signal;

pub use event::UptimeEvent;
pub use ids::HostName;
pub use signal::{TransitionSignal, UnknownSignal};

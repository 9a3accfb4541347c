//! Transition source: turns OS power, session and service-control
//! notifications into [`TransitionSignal`](crate::types::TransitionSignal)s.
//!
//! Backends implement [`NotificationBackend`]. [`LogindBackend`] follows
//! systemd-logind over the system bus; [`ChannelBackend`] is fed in-process.
//! [`TransitionSource`] runs a backend on its own thread and forwards signals
//! to the recorder through a bounded channel.

mod backend;
mod logind;
mod notification;
mod transition;

pub use backend::{ChannelBackend, ChannelNotifier, NotificationBackend, SourceError};
pub use logind::{LogindBackend, REGISTER_TIMEOUT, parse_monitor_line};
pub use notification::RawNotification;
pub use transition::{POLL_INTERVAL, TransitionSource};

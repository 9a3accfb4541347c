//! systemd-logind backend.
//!
//! Watches `org.freedesktop.login1` on the system bus by running
//! `gdbus monitor` as a child process and reading its signal lines:
//!
//! ```text
//! /org/freedesktop/login1: org.freedesktop.login1.Manager.PrepareForSleep (true,)
//! /org/freedesktop/login1/session/_32: org.freedesktop.login1.Session.Lock ()
//! ```
//!
//! Registration is the child announcing that monitoring started; unregistering
//! kills the child.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use super::backend::{NotificationBackend, SourceError};
use super::notification::RawNotification;

const BACKEND_NAME: &str = "logind";

/// How long the monitor may take to confirm it is listening.
pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

const MONITOR_BANNER: &str = "Monitoring signals";

/// Parses one `gdbus monitor` line.
///
/// Returns `None` for lines that are not signal emissions (banners, blank
/// lines, continuation output).
pub fn parse_monitor_line(line: &str) -> Option<RawNotification> {
    let (_object, rest) = line.trim().split_once(": ")?;
    let (member, args) = rest.split_once(' ').unwrap_or((rest, ""));
    if !member.starts_with("org.freedesktop.") {
        return None;
    }
    let flag = args.contains("true");

    let notification = match member {
        "org.freedesktop.login1.Manager.PrepareForSleep" if flag => RawNotification::Suspend,
        "org.freedesktop.login1.Manager.PrepareForSleep" => RawNotification::Resume,
        "org.freedesktop.login1.Manager.PrepareForShutdown" if flag => RawNotification::Shutdown,
        "org.freedesktop.login1.Session.Lock" => RawNotification::Lock,
        "org.freedesktop.login1.Session.Unlock" => RawNotification::Unlock,
        _ => RawNotification::Unrecognized(member.to_string()),
    };
    Some(notification)
}

/// Backend that follows logind sleep, shutdown and lock signals.
#[derive(Debug)]
pub struct LogindBackend {
    program: String,
    child: Option<Child>,
    lines: Option<Receiver<String>>,
    reader: Option<JoinHandle<()>>,
}

impl Default for LogindBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LogindBackend {
    /// Uses `gdbus` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("gdbus")
    }

    /// Uses a specific monitor executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        LogindBackend {
            program: program.into(),
            child: None,
            lines: None,
            reader: None,
        }
    }

    fn registration_error(reason: impl Into<String>, source: Option<std::io::Error>) -> SourceError {
        SourceError::Register {
            backend: BACKEND_NAME,
            reason: reason.into(),
            source,
        }
    }
}

impl NotificationBackend for LogindBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn register(&mut self) -> Result<(), SourceError> {
        let mut child = Command::new(&self.program)
            .args(["monitor", "--system", "--dest", "org.freedesktop.login1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Self::registration_error(format!("cannot run {}", self.program), Some(e)))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Self::registration_error("monitor has no stdout", None));
        };

        let (tx, rx) = mpsc::channel();
        let reader = std::thread::Builder::new()
            .name("logind-monitor-reader".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| {
                let _ = child.kill();
                let _ = child.wait();
                Self::registration_error("cannot spawn reader thread", Some(e))
            })?;

        let first = rx.recv_timeout(REGISTER_TIMEOUT);
        self.child = Some(child);
        self.lines = Some(rx);
        self.reader = Some(reader);

        match first {
            Ok(line) if line.contains(MONITOR_BANNER) => {
                debug!(banner = %line, "logind monitor registered");
                Ok(())
            }
            Ok(line) => {
                self.unregister();
                Err(Self::registration_error(
                    format!("unexpected monitor output: {line}"),
                    None,
                ))
            }
            _ => {
                self.unregister();
                Err(Self::registration_error(
                    "monitor exited or did not confirm in time",
                    None,
                ))
            }
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<RawNotification>, SourceError> {
        let Some(lines) = self.lines.as_ref() else {
            return Err(SourceError::Closed {
                backend: BACKEND_NAME,
            });
        };

        match lines.recv_timeout(timeout) {
            Ok(line) => Ok(parse_monitor_line(&line)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Closed {
                backend: BACKEND_NAME,
            }),
        }
    }

    fn unregister(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!(error = %e, "logind monitor already exited");
            }
            if let Err(e) = child.wait() {
                warn!(error = %e, "Failed to reap logind monitor");
            }
        }
        self.lines = None;
        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            warn!("logind monitor reader panicked");
        }
    }
}

impl Drop for LogindBackend {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_for_sleep_maps_both_directions() {
        assert_eq!(
            parse_monitor_line(
                "/org/freedesktop/login1: org.freedesktop.login1.Manager.PrepareForSleep (true,)"
            ),
            Some(RawNotification::Suspend)
        );
        assert_eq!(
            parse_monitor_line(
                "/org/freedesktop/login1: org.freedesktop.login1.Manager.PrepareForSleep (false,)"
            ),
            Some(RawNotification::Resume)
        );
    }

    #[test]
    fn session_lock_and_unlock_are_distinguished() {
        assert_eq!(
            parse_monitor_line(
                "/org/freedesktop/login1/session/_32: org.freedesktop.login1.Session.Lock ()"
            ),
            Some(RawNotification::Lock)
        );
        assert_eq!(
            parse_monitor_line(
                "/org/freedesktop/login1/session/_32: org.freedesktop.login1.Session.Unlock ()"
            ),
            Some(RawNotification::Unlock)
        );
    }

    #[test]
    fn shutdown_only_when_starting() {
        assert_eq!(
            parse_monitor_line(
                "/org/freedesktop/login1: org.freedesktop.login1.Manager.PrepareForShutdown (true,)"
            ),
            Some(RawNotification::Shutdown)
        );
        assert!(matches!(
            parse_monitor_line(
                "/org/freedesktop/login1: org.freedesktop.login1.Manager.PrepareForShutdown (false,)"
            ),
            Some(RawNotification::Unrecognized(_))
        ));
    }

    #[test]
    fn other_signals_are_unrecognized() {
        assert_eq!(
            parse_monitor_line(
                "/org/freedesktop/login1/session/_32: org.freedesktop.DBus.Properties.PropertiesChanged ('org.freedesktop.login1.Session', {'Active': <true>}, @as [])"
            ),
            Some(RawNotification::Unrecognized(
                "org.freedesktop.DBus.Properties.PropertiesChanged".to_string()
            ))
        );
    }

    #[test]
    fn banner_and_blank_lines_are_ignored() {
        assert_eq!(
            parse_monitor_line("Monitoring signals from all objects owned by org.freedesktop.login1"),
            None
        );
        assert_eq!(
            parse_monitor_line("The name org.freedesktop.login1 is owned by :1.4"),
            None
        );
        assert_eq!(parse_monitor_line(""), None);
    }

    #[test]
    fn missing_program_fails_registration() {
        let mut backend = LogindBackend::with_program("/nonexistent/gdbus-for-tests");
        let err = backend.register().unwrap_err();
        assert!(matches!(err, SourceError::Register { .. }));
        assert!(backend.child.is_none());
    }

    #[cfg(unix)]
    fn fake_monitor(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-gdbus");
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn registered_monitor_delivers_signals_until_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_monitor(
            dir.path(),
            "echo 'Monitoring signals from all objects owned by org.freedesktop.login1'\n\
             echo '/org/freedesktop/login1: org.freedesktop.login1.Manager.PrepareForSleep (true,)'\n\
             exec sleep 30\n",
        );
        let mut backend = LogindBackend::with_program(program.to_string_lossy());

        backend.register().unwrap();
        #[cfg(target_os = "linux")]
        let pid = backend.child.as_ref().map(Child::id).unwrap();

        let mut received = None;
        for _ in 0..50 {
            if let Some(n) = backend.recv_timeout(Duration::from_millis(100)).unwrap() {
                received = Some(n);
                break;
            }
        }
        assert_eq!(received, Some(RawNotification::Suspend));

        backend.unregister();
        assert!(backend.child.is_none());
        assert!(backend.reader.is_none());
        #[cfg(target_os = "linux")]
        assert!(
            !std::path::Path::new(&format!("/proc/{pid}")).exists(),
            "monitor process was reaped"
        );

        assert!(matches!(
            backend.recv_timeout(Duration::from_millis(10)),
            Err(SourceError::Closed { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn program_without_banner_fails_registration() {
        // `true` exits immediately without printing anything.
        let mut backend = LogindBackend::with_program("true");
        let err = backend.register().unwrap_err();
        assert!(matches!(err, SourceError::Register { .. }));
        assert!(backend.child.is_none());
        assert!(backend.reader.is_none());
    }
}

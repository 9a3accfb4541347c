//! Startup configuration.
//!
//! The configuration is a JSON file, by default `config.json` next to the
//! executable:
//!
//! ```json
//! {
//!   "host": "db.internal",
//!   "port": 5432,
//!   "user": "uptime",
//!   "password": "secret",
//!   "database": "monitoring",
//!   "hostname": "desk-01"
//! }
//! ```
//!
//! The first five fields are datastore connection parameters; `hostname` is
//! the identity written into every event. Any failure here is fatal.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::types::HostName;

/// Default configuration file name, resolved next to the executable.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Default fallback queue file name, resolved next to the executable.
pub const QUEUE_FILE_NAME: &str = "events.txt";

/// Errors that can occur while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not valid JSON for [`AppConfig`].
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A field has an unusable value.
    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    /// The executable's own location could not be determined.
    #[error("cannot locate executable: {0}")]
    ExecutablePath(#[source] io::Error),
}

/// Result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Datastore connection parameters plus the host identity.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    pub hostname: String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("hostname", &self.hostname)
            .finish()
    }
}

impl AppConfig {
    /// Reads, parses and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_slice(&bytes).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parses and validates configuration JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_slice(bytes).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every required field is usable.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("host", &self.host),
            ("user", &self.user),
            ("database", &self.database),
            ("hostname", &self.hostname),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty",
                });
            }
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "must be non-zero",
            });
        }
        Ok(())
    }

    /// The identity written into every event.
    pub fn host_name(&self) -> HostName {
        HostName::new(self.hostname.clone())
    }
}

/// Resolves `file_name` in the directory containing the running executable.
pub fn beside_executable(file_name: &str) -> Result<PathBuf> {
    let exe = std::env::current_exe().map_err(ConfigError::ExecutablePath)?;
    let dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(dir.join(file_name))
}

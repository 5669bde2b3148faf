//! Configuration for podsql
//!
//! Settings come from an optional YAML file (default
//! `~/.config/podsql.yaml`) and are overridden by command-line flags.
//!
//! ```yaml
//! timezone: Asia/Tokyo
//! namespace: databases
//! kubeconfig: /home/me/.kube/prod
//! poll_interval_ms: 1000
//! ready_timeout_secs: 60
//! ```

use crate::error::{PodsqlError, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_ready_timeout_secs() -> u64 {
    60
}

/// On-disk configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PodsqlConfig {
    /// IANA timezone used for pod names and the container `TZ`
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Namespace the pods run in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Explicit kubeconfig path
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Pod status poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long to wait for a pod to start, in seconds
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl Default for PodsqlConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            namespace: default_namespace(),
            kubeconfig: None,
            poll_interval_ms: default_poll_interval_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

impl PodsqlConfig {
    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("podsql.yaml"))
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PodsqlError::config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
            .map_err(|e| PodsqlError::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from YAML text. Empty text yields defaults.
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file at the default location means defaults; an explicitly
    /// named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Apply command-line overrides and validate into [`Settings`]
    pub fn resolve(self, overrides: Overrides) -> Result<Settings> {
        let timezone = overrides.timezone.unwrap_or(self.timezone);
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| PodsqlError::config(format!("unknown timezone '{}'", timezone)))?;

        let namespace = overrides.namespace.unwrap_or(self.namespace);
        if namespace.is_empty() {
            return Err(PodsqlError::config("namespace must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(PodsqlError::config("poll_interval_ms must be greater than zero"));
        }
        if self.ready_timeout_secs == 0 {
            return Err(PodsqlError::config("ready_timeout_secs must be greater than zero"));
        }

        Ok(Settings {
            timezone,
            namespace,
            kubeconfig: overrides.kubeconfig.or(self.kubeconfig),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
        })
    }
}

/// Values given on the command line, taking precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub timezone: Option<String>,
    pub namespace: Option<String>,
    pub kubeconfig: Option<PathBuf>,
}

/// Validated runtime settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub timezone: Tz,
    pub namespace: String,
    pub kubeconfig: Option<PathBuf>,
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            namespace: default_namespace(),
            kubeconfig: None,
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            ready_timeout: Duration::from_secs(default_ready_timeout_secs()),
        }
    }
}

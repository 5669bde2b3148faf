//! Error types for podsql
//!
//! Errors are grouped by the phase that produced them:
//! - argument parsing (no cluster objects exist yet)
//! - cluster object creation and readiness
//! - streaming (interactive exec or batch log follow)
//! - teardown, which is always joined with whatever caused it

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for podsql operations
pub type Result<T> = std::result::Result<T, PodsqlError>;

/// Errors that can occur while translating arguments or driving a pod
#[derive(Error, Debug)]
pub enum PodsqlError {
    /// A flag that takes a value was the last token
    #[error("flag '{flag}' requires a value")]
    MissingFlagValue { flag: String },

    /// A credentials file record did not have exactly five fields
    #[error("invalid record in {}:{line}: expected 5 fields, found {fields}", path.display())]
    InvalidPassFile {
        path: PathBuf,
        line: usize,
        fields: usize,
    },

    /// A local script file could not be read
    #[error("failed to read script file {}: {source}", path.display())]
    ScriptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Kubernetes API error
    #[error("failed to {action}: {source}")]
    Kube {
        action: String,
        #[source]
        source: kube::Error,
    },

    /// A resource could not be built or was returned incomplete
    #[error("invalid resource: {0}")]
    Resource(String),

    /// The pod did not become ready in time
    #[error("pod {name} was not running after {}s", timeout.as_secs())]
    ReadyTimeout { name: String, timeout: Duration },

    /// The container image could not be pulled
    #[error("pod running failed. reason: {reason}, message: {message}")]
    ImagePullBackOff { reason: String, message: String },

    /// Exec or log stream failure
    #[error("stream error: {0}")]
    Stream(String),

    /// Local terminal failure
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A failure followed by a failed attempt to delete the pod
    #[error("{cause}; failed to delete pod: {cleanup}")]
    Cleanup {
        cause: Box<PodsqlError>,
        cleanup: Box<PodsqlError>,
    },
}

impl PodsqlError {
    /// Create a missing flag value error
    pub fn missing_value(flag: impl Into<String>) -> Self {
        Self::MissingFlagValue { flag: flag.into() }
    }

    /// Wrap a Kubernetes API error with the action that failed
    pub fn kube(action: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            action: action.into(),
            source,
        }
    }

    /// Create a stream error
    pub fn stream(message: impl std::fmt::Display) -> Self {
        Self::Stream(message.to_string())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Join this error with the outcome of a cleanup attempt.
    ///
    /// A successful cleanup leaves the error untouched.
    pub fn with_cleanup(self, cleanup: Result<()>) -> Self {
        match cleanup {
            Ok(()) => self,
            Err(e) => Self::Cleanup {
                cause: Box::new(self),
                cleanup: Box::new(e),
            },
        }
    }

    /// Whether this error was raised before any cluster object existed
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::MissingFlagValue { .. } | Self::InvalidPassFile { .. } | Self::ScriptFile { .. }
        )
    }

    /// The error that started the failure chain
    pub fn root_cause(&self) -> &PodsqlError {
        match self {
            Self::Cleanup { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

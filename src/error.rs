//! Error types for fleetship.
//!
//! The taxonomy follows four kinds: configuration errors (fatal at
//! graph-build time), orchestration errors (a task's own unrecoverable
//! failure), transient host errors (an engine call raised, reported
//! per-task), and stop failures (non-fatal, reported as a warning).

use thiserror::Error;

/// Result type alias for fleetship operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value failed validation while building the entity graph.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Human-readable description of the violated invariant.
        message: String,
    },

    /// A task hit an unrecoverable runtime failure.
    #[error("orchestration failed: {message}")]
    Orchestration {
        /// Description of what went wrong.
        message: String,
        /// Trailing excerpt of the container's logs, if one was available.
        log_excerpt: Option<String>,
    },

    /// The engine call itself raised (host unreachable, connection refused, etc).
    ///
    /// This is reported against a single task; it must never abort its peers.
    #[error("host unreachable: {message}")]
    TransientHost {
        /// Name of the ship that could not be reached.
        ship: String,
        /// Underlying failure description.
        message: String,
    },

    /// `stop` succeeded but the stopped-state probes did not confirm it.
    ///
    /// Reported as a warning; never propagated as a fatal error.
    #[error("stop probes did not confirm container {container} stopped: {message}")]
    StopFailure {
        /// Name of the container instance.
        container: String,
        /// Description of the probe failure.
        message: String,
    },

    /// IO error encountered talking to a transport (socket, tunnel, file).
    #[error("IO error: {message}")]
    Io {
        /// Contextual message.
        message: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding/decoding error.
    #[error("JSON error: {message}")]
    Json {
        /// Contextual message.
        message: String,
        /// Underlying serde_json error.
        #[source]
        source: serde_json::Error,
    },

    /// An engine call did not complete within its configured timeout.
    #[error("operation timed out after {timeout_secs}s")]
    Timeout {
        /// Configured timeout, in seconds.
        timeout_secs: u64,
    },
}

impl Error {
    /// Build a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Build an `Orchestration` error with no attached log excerpt.
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration {
            message: message.into(),
            log_excerpt: None,
        }
    }

    /// Build an `Orchestration` error carrying a log excerpt (StartTask step 9).
    pub fn orchestration_with_logs(message: impl Into<String>, logs: impl Into<String>) -> Self {
        Self::Orchestration {
            message: message.into(),
            log_excerpt: Some(logs.into()),
        }
    }

    /// Build a `TransientHost` error.
    pub fn transient_host(ship: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientHost {
            ship: ship.into(),
            message: message.into(),
        }
    }

    /// Build a `StopFailure` error.
    pub fn stop_failure(container: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StopFailure {
            container: container.into(),
            message: message.into(),
        }
    }

    /// Error category for logging/metrics correlation.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "config",
            Self::Orchestration { .. } => "orchestration",
            Self::TransientHost { .. } => "host",
            Self::StopFailure { .. } => "stop",
            Self::Io { .. } => "io",
            Self::Json { .. } => "parsing",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Whether the failure is specific to one task and safe to retry
    /// without affecting sibling tasks.
    #[must_use]
    pub fn is_task_local(&self) -> bool {
        matches!(
            self,
            Self::TransientHost { .. } | Self::StopFailure { .. } | Self::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::configuration("bad").category(), "config");
        assert_eq!(Error::orchestration("bad").category(), "orchestration");
        assert_eq!(
            Error::transient_host("ship1", "refused").category(),
            "host"
        );
        assert_eq!(Error::stop_failure("c1", "still up").category(), "stop");
    }

    #[test]
    fn test_task_local_errors() {
        assert!(Error::transient_host("ship1", "refused").is_task_local());
        assert!(Error::stop_failure("c1", "still up").is_task_local());
        assert!(!Error::configuration("bad").is_task_local());
        assert!(!Error::orchestration("bad").is_task_local());
    }

    #[test]
    fn test_orchestration_with_logs() {
        let err = Error::orchestration_with_logs("did not start", "line1\nline2");
        match err {
            Error::Orchestration { log_excerpt, .. } => {
                assert_eq!(log_excerpt.as_deref(), Some("line1\nline2"));
            }
            _ => panic!("wrong variant"),
        }
    }
}

//! Error types returned by pipeline operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can settle a transform request.
///
/// Nothing in this crate retries: every variant reaches the caller of the
/// facade operation exactly as it was produced.
#[derive(Debug, Error)]
pub enum PipeError {
    /// The transform tool could not be located on this host.
    #[error("Transform tool not found: {0}")]
    ExecutableNotFound(String),

    /// The transform tool could not be started.
    #[error("Failed to spawn '{}': {source}", .tool.display())]
    Spawn {
        /// Path or name of the tool that failed to start.
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source file could not be read or a destination could not be written.
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        /// File the failing operation targeted.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A subprocess channel or the standard output stream failed mid-transfer.
    #[error("Stream failed at stage '{stage}': {source}")]
    Stream {
        /// Pipeline stage that observed the failure.
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The request shape is invalid; rejected before any subprocess exists.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The tool exited with a non-zero status.
    ///
    /// Displays as the accumulated diagnostic text only, which may be empty
    /// when the argument list routed diagnostics into the output channel.
    #[error("{diagnostic}")]
    Transform {
        /// Text the tool emitted on its diagnostic channel.
        diagnostic: String,
        /// Exit code, `None` when the tool was terminated by a signal.
        exit_code: Option<i32>,
    },

    /// An external interrupt aborted the request.
    #[error("Transform cancelled by interrupt")]
    Cancelled,

    /// A pump task panicked or was aborted.
    #[error("Pump task failed at stage '{stage}': {source}")]
    TaskFailed {
        /// Pump that failed.
        stage: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },

    /// Child process stdin was not captured.
    #[error("Child process stdin was not captured")]
    NoStdin,

    /// Child process stdout was not captured.
    #[error("Child process stdout was not captured")]
    NoStdout,

    /// Child process stderr was not captured.
    #[error("Child process stderr was not captured")]
    NoStderr,
}

impl PipeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the tool could not be located or started.
    #[must_use]
    pub const fn is_spawn(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::ExecutableNotFound(_))
    }

    /// Returns `true` for source or destination I/O failures.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Stream { .. })
    }

    /// Returns `true` if the request was rejected before spawning.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns `true` if the tool ran and exited non-zero.
    #[must_use]
    pub const fn is_transform(&self) -> bool {
        matches!(self, Self::Transform { .. })
    }

    /// Returns `true` if an interrupt aborted the request.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Diagnostic text of a failed transform, if this is one.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Transform { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_error_displays_diagnostic_verbatim() {
        let err = PipeError::Transform {
            diagnostic: "bad passphrase".to_string(),
            exit_code: Some(2),
        };
        assert_eq!(err.to_string(), "bad passphrase");
        assert_eq!(err.diagnostic(), Some("bad passphrase"));
        assert!(err.is_transform());
    }

    #[test]
    fn empty_diagnostic_is_not_replaced() {
        let err = PipeError::Transform {
            diagnostic: String::new(),
            exit_code: Some(1),
        };
        assert_eq!(err.to_string(), "");
    }

    #[test]
    fn io_error_keeps_its_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = PipeError::io("/tmp/missing", source);
        assert!(err.is_io());
        let inner = std::error::Error::source(&err)
            .and_then(|e| e.downcast_ref::<std::io::Error>())
            .map(std::io::Error::kind);
        assert_eq!(inner, Some(std::io::ErrorKind::NotFound));
    }
}

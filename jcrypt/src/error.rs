//! Public error types for jcrypt.

use thiserror::Error;

/// Errors returned by [`Jcrypt`](crate::Jcrypt) operations.
#[derive(Debug, Error)]
pub enum JcryptError {
    /// gpg was not found on the system.
    #[error("gpg not found. Install GnuPG (https://gnupg.org/download/) or set {var}")]
    GpgNotFound {
        /// Environment variable that overrides discovery.
        var: &'static str,
    },

    /// The subprocess pipeline failed.
    ///
    /// Displays exactly as the pipeline error, so a gpg failure reads as
    /// gpg's own diagnostic text.
    #[error(transparent)]
    Pipe(#[from] jcrypt_pipe::PipeError),

    /// The configuration file could not be read.
    #[error("Failed to read config '{}': {source}", .path.display())]
    ConfigRead {
        /// Config file path.
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`JcryptConfig`](crate::JcryptConfig).
    #[error("Invalid config '{}': {source}", .path.display())]
    ConfigParse {
        /// Config file path.
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration error (invalid settings or options).
    #[error("Configuration error: {0}")]
    Config(String),
}

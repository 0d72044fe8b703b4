//! Destination file write options and their process-wide default.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Restrictive default permission mode: owner read/write only.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// How the payload is treated when written to a file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Raw bytes, written as produced.
    #[default]
    Binary,
    /// The payload must be valid UTF-8; anything else is rejected before writing.
    Utf8,
}

/// Creation flags for destination files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteFlags {
    /// Create or truncate.
    #[default]
    Truncate,
    /// Create or append.
    Append,
    /// Create; fail if the file already exists.
    CreateNew,
}

/// Options applied when opening a destination file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WriteOptions {
    /// Payload encoding check.
    pub encoding: Encoding,
    /// Creation flags.
    pub flags: WriteFlags,
    /// Unix permission bits for newly created files. Ignored elsewhere.
    pub mode: u32,
    /// Never stream file-to-file transforms, even with an explicit destination.
    pub force_buffered: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::Binary,
            flags: WriteFlags::Truncate,
            mode: DEFAULT_FILE_MODE,
            force_buffered: false,
        }
    }
}

impl WriteOptions {
    /// Builds the `OpenOptions` these write options describe.
    #[must_use]
    pub fn open_options(&self) -> tokio::fs::OpenOptions {
        let mut open = tokio::fs::OpenOptions::new();
        open.write(true);
        match self.flags {
            WriteFlags::Truncate => {
                open.create(true).truncate(true);
            }
            WriteFlags::Append => {
                open.create(true).append(true);
            }
            WriteFlags::CreateNew => {
                open.create_new(true);
            }
        }
        #[cfg(unix)]
        open.mode(self.mode);
        open
    }

    /// Checks a complete payload against the configured encoding.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if the encoding is `Utf8` and `bytes` is not UTF-8.
    pub fn check_payload(&self, bytes: &[u8]) -> std::io::Result<()> {
        match self.encoding {
            Encoding::Binary => Ok(()),
            Encoding::Utf8 => std::str::from_utf8(bytes).map(|_| ()).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e)
            }),
        }
    }
}

/// A replaceable write options value with snapshot-on-read semantics.
#[derive(Debug, Default)]
pub struct WriteOptionsCell {
    current: RwLock<Arc<WriteOptions>>,
}

impl WriteOptionsCell {
    /// Creates a cell holding `options`.
    #[must_use]
    pub fn new(options: WriteOptions) -> Self {
        Self {
            current: RwLock::new(Arc::new(options)),
        }
    }

    /// Returns the current value. The snapshot never changes afterwards.
    #[must_use]
    pub fn snapshot(&self) -> Arc<WriteOptions> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the value seen by future snapshots.
    pub fn replace(&self, options: WriteOptions) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(options);
    }
}

fn global() -> &'static WriteOptionsCell {
    static DEFAULT: OnceLock<WriteOptionsCell> = OnceLock::new();
    DEFAULT.get_or_init(WriteOptionsCell::default)
}

/// Returns a snapshot of the process-wide default write options.
///
/// Requests take one snapshot when they start; later replacements do not
/// affect them.
#[must_use]
pub fn default_write_options() -> Arc<WriteOptions> {
    global().snapshot()
}

/// Replaces the process-wide default write options.
pub fn set_default_write_options(options: WriteOptions) {
    global().replace(options);
    tracing::debug!(?options, "default write options replaced");
}

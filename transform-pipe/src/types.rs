//! Request and result types shared by the pipeline stages.

use crate::options::WriteOptions;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

/// Where the payload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A file on disk, read to completion (buffered) or streamed.
    File(PathBuf),
    /// Bytes already held in memory.
    Bytes(Vec<u8>),
}

/// Where the transformed bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// An explicit file path.
    File(PathBuf),
    /// Overwrite the source file. Only valid for buffered file sources.
    SourceFile,
    /// Return the bytes to the caller.
    Memory,
    /// The program's own standard output.
    Stdout,
}

/// How bytes move between the endpoints and the tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Mode {
    /// Read the whole source into memory, transform, then write once.
    #[default]
    Buffered,
    /// Connect source and destination directly to the tool's channels.
    Streamed,
}

/// Which channel carries the tool's failure text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DiagnosticRouting {
    /// Diagnostics arrive on the tool's stderr.
    #[default]
    Separate,
    /// The argument list redirects diagnostics into the output channel, so a
    /// failed buffered transform reports the output text as its diagnostic.
    Merged,
}

/// An ordered argument list plus the routing it implies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Invocation {
    /// Arguments passed to the tool, in order.
    pub args: Vec<OsString>,
    /// Where the tool's diagnostics end up.
    pub routing: DiagnosticRouting,
}

impl Invocation {
    /// Creates an invocation with separately routed diagnostics.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Self {
            args: args.into_iter().map(|a| a.as_ref().to_os_string()).collect(),
            routing: DiagnosticRouting::Separate,
        }
    }

    /// Declares that the arguments redirect diagnostics into the output channel.
    #[must_use]
    pub fn merged_diagnostics(mut self) -> Self {
        self.routing = DiagnosticRouting::Merged;
        self
    }
}

impl<S: AsRef<OsStr>> From<&[S]> for Invocation {
    fn from(args: &[S]) -> Self {
        Self::new(args)
    }
}

impl<S: AsRef<OsStr>, const N: usize> From<[S; N]> for Invocation {
    fn from(args: [S; N]) -> Self {
        Self::new(args)
    }
}

impl<S: AsRef<OsStr>> From<Vec<S>> for Invocation {
    fn from(args: Vec<S>) -> Self {
        Self::new(args)
    }
}

/// One transform, constructed per call and consumed by it.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    /// Payload origin.
    pub source: Source,
    /// Result target.
    pub destination: Destination,
    /// Tool arguments and diagnostic routing.
    pub invocation: Invocation,
    /// Buffered or streamed transfer.
    pub mode: Mode,
    /// Overrides the facade's write options for this request only.
    pub write_options: Option<WriteOptions>,
}

impl TransformRequest {
    /// Creates a buffered request with no write option override.
    pub fn new(source: Source, destination: Destination, invocation: impl Into<Invocation>) -> Self {
        Self {
            source,
            destination,
            invocation: invocation.into(),
            mode: Mode::Buffered,
            write_options: None,
        }
    }

    /// Sets the transfer mode.
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Overrides write options for this request.
    #[must_use]
    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.write_options = Some(options);
        self
    }
}

/// The settled success value of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutput {
    /// Transformed bytes returned in memory.
    Bytes(Vec<u8>),
    /// Transformed bytes were written to this file.
    Written(PathBuf),
    /// Transformed bytes were written to standard output.
    Stdout,
}

impl TransformOutput {
    /// Returns the in-memory bytes, if any.
    #[must_use]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the written file path, if any.
    #[must_use]
    pub fn into_path(self) -> Option<PathBuf> {
        match self {
            Self::Written(path) => Some(path),
            _ => None,
        }
    }
}

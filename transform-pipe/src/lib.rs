//! Drive an external command-line transform tool as a subprocess pipeline.
//!
//! Bytes go in on the tool's stdin, transformed bytes come back on its
//! stdout and diagnostics on its stderr. Payloads are either buffered fully
//! in memory or streamed file-to-file so large inputs never have to fit in
//! memory. Each request owns exactly one subprocess.

/// Interrupt handling and cancellation of in-flight transforms.
pub mod cancel;
/// Discovery of the transform tool executable.
pub mod discovery;
/// Error types returned by pipeline operations.
pub mod error;
/// Source and destination endpoint resolution.
pub mod io;
/// Spawning and terminating the tool subprocess.
pub mod invoker;
/// Destination write options and the process-wide default.
pub mod options;
/// The per-request coordination state machine.
pub mod process;
/// Request, invocation and output types.
pub mod types;

pub use cancel::CancellationController;
pub use discovery::discover_tool;
pub use error::PipeError;
pub use options::{
    default_write_options, set_default_write_options, Encoding, WriteFlags, WriteOptions,
};
pub use process::{Coordinator, State};
pub use types::*;

use crate::io::ResolvedDestination;
use crate::process::OutputTarget;
use std::path::{Path, PathBuf};

/// High-level client for one transform tool.
///
/// Every operation spawns a fresh subprocess and settles to a single value
/// or error; nothing partial is exposed.
#[derive(Debug, Clone)]
pub struct Transformer {
    /// Filesystem path (or `$PATH` name) of the tool executable.
    pub path: PathBuf,
    write_options: Option<WriteOptions>,
    cancellation: Option<CancellationController>,
}

impl Transformer {
    /// Creates a transformer for the tool at `path`, using the process-wide
    /// write options and cancellation controller.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_options: None,
            cancellation: None,
        }
    }

    /// Locates the tool with [`discover_tool`] and wraps it.
    ///
    /// # Errors
    ///
    /// Returns `PipeError::ExecutableNotFound` if no executable is found.
    pub fn discover(
        names: &[&str],
        env_var: &str,
        explicit_path: Option<PathBuf>,
    ) -> Result<Self, PipeError> {
        discover_tool(names, env_var, explicit_path).map(Self::new)
    }

    /// Pins write options for this transformer instead of the process default.
    #[must_use]
    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.write_options = Some(options);
        self
    }

    /// Uses `controller` instead of the process-wide one.
    #[must_use]
    pub fn with_cancellation(mut self, controller: CancellationController) -> Self {
        self.cancellation = Some(controller);
        self
    }

    /// The write options a request started now would use.
    #[must_use]
    pub fn write_options(&self) -> WriteOptions {
        self.write_options
            .unwrap_or_else(|| *default_write_options())
    }

    fn controller(&self) -> &CancellationController {
        self.cancellation
            .as_ref()
            .unwrap_or_else(|| CancellationController::global())
    }

    /// Runs one request to completion.
    ///
    /// Write options are snapshotted once, before anything else happens.
    /// Invalid request shapes are rejected before the tool is spawned.
    ///
    /// # Errors
    ///
    /// Any [`PipeError`]; see the variants for the taxonomy.
    pub async fn execute(&self, request: TransformRequest) -> Result<TransformOutput, PipeError> {
        let options = request
            .write_options
            .unwrap_or_else(|| self.write_options());
        let destination = io::resolve_destination(&request)?;
        let mut coordinator = Coordinator::new(request.invocation.routing);
        tracing::debug!(mode = ?request.mode, ?destination, "starting transform");

        match request.mode {
            Mode::Buffered => {
                let payload = io::read_source(request.source).await?;
                let done = coordinator
                    .run(
                        &self.path,
                        &request.invocation,
                        Box::new(std::io::Cursor::new(payload)),
                        OutputTarget::buffer(),
                        Some(self.controller()),
                    )
                    .await?;
                let bytes = done.output.unwrap_or_default();
                match destination {
                    ResolvedDestination::Memory => Ok(TransformOutput::Bytes(bytes)),
                    ResolvedDestination::Stdout => {
                        io::write_stdout(&bytes).await?;
                        Ok(TransformOutput::Stdout)
                    }
                    ResolvedDestination::File(path) => {
                        io::write_file(&path, &bytes, &options).await?;
                        Ok(TransformOutput::Written(path))
                    }
                }
            }
            Mode::Streamed => {
                let input = io::open_source(request.source).await?;
                let sink = io::open_sink(&destination, &options).await?;
                coordinator
                    .run(
                        &self.path,
                        &request.invocation,
                        input,
                        OutputTarget::Writer(sink),
                        Some(self.controller()),
                    )
                    .await?;
                match destination {
                    ResolvedDestination::File(path) => Ok(TransformOutput::Written(path)),
                    ResolvedDestination::Stdout => Ok(TransformOutput::Stdout),
                    ResolvedDestination::Memory => Err(PipeError::Configuration(
                        "Streamed transforms cannot return bytes in memory".to_string(),
                    )),
                }
            }
        }
    }

    /// Transforms in-memory bytes and returns the result.
    ///
    /// # Errors
    ///
    /// Returns `PipeError` if the tool fails to start or exits non-zero.
    pub async fn transform(
        &self,
        bytes: impl Into<Vec<u8>>,
        invocation: impl Into<Invocation>,
    ) -> Result<Vec<u8>, PipeError> {
        let request =
            TransformRequest::new(Source::Bytes(bytes.into()), Destination::Memory, invocation);
        self.execute(request).await.map(expect_bytes)
    }

    /// Reads a file, transforms it in memory, and returns the result.
    ///
    /// # Errors
    ///
    /// Returns `PipeError::Io` if the file cannot be read, otherwise as
    /// [`transform`](Self::transform).
    pub async fn transform_file(
        &self,
        path: impl AsRef<Path>,
        invocation: impl Into<Invocation>,
    ) -> Result<Vec<u8>, PipeError> {
        let request = TransformRequest::new(
            Source::File(path.as_ref().to_path_buf()),
            Destination::Memory,
            invocation,
        );
        self.execute(request).await.map(expect_bytes)
    }

    /// Transforms `src` into `dest`, or into `src` itself when `dest` is `None`.
    ///
    /// Buffered when rewriting in place or when the write options force it;
    /// streamed otherwise.
    ///
    /// # Errors
    ///
    /// Returns `PipeError::Configuration` if a streamed destination is the
    /// source, otherwise as [`execute`](Self::execute).
    pub async fn transform_file_to_file(
        &self,
        src: impl AsRef<Path>,
        dest: Option<&Path>,
        invocation: impl Into<Invocation>,
    ) -> Result<PathBuf, PipeError> {
        let options = self.write_options();
        let (destination, mode) = match dest {
            None => (Destination::SourceFile, Mode::Buffered),
            Some(path) if options.force_buffered => {
                (Destination::File(path.to_path_buf()), Mode::Buffered)
            }
            Some(path) => (Destination::File(path.to_path_buf()), Mode::Streamed),
        };
        let request = TransformRequest::new(
            Source::File(src.as_ref().to_path_buf()),
            destination,
            invocation,
        )
        .with_mode(mode)
        .with_write_options(options);
        self.execute(request).await.and_then(expect_path)
    }

    /// Transforms in-memory bytes and writes the result to `dest` in one write.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub async fn transform_bytes_to_file(
        &self,
        bytes: impl Into<Vec<u8>>,
        dest: impl AsRef<Path>,
        invocation: impl Into<Invocation>,
    ) -> Result<PathBuf, PipeError> {
        let request = TransformRequest::new(
            Source::Bytes(bytes.into()),
            Destination::File(dest.as_ref().to_path_buf()),
            invocation,
        );
        self.execute(request).await.and_then(expect_path)
    }

    /// Transforms in-memory bytes and writes the result to standard output.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub async fn transform_bytes_to_stdout(
        &self,
        bytes: impl Into<Vec<u8>>,
        invocation: impl Into<Invocation>,
    ) -> Result<(), PipeError> {
        let request =
            TransformRequest::new(Source::Bytes(bytes.into()), Destination::Stdout, invocation);
        self.execute(request).await.map(|_| ())
    }

    /// Streams a file through the tool straight to standard output.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute).
    pub async fn stream_file_to_stdout(
        &self,
        src: impl AsRef<Path>,
        invocation: impl Into<Invocation>,
    ) -> Result<(), PipeError> {
        let request = TransformRequest::new(
            Source::File(src.as_ref().to_path_buf()),
            Destination::Stdout,
            invocation,
        )
        .with_mode(Mode::Streamed);
        self.execute(request).await.map(|_| ())
    }
}

fn expect_bytes(output: TransformOutput) -> Vec<u8> {
    output.into_bytes().unwrap_or_default()
}

fn expect_path(output: TransformOutput) -> Result<PathBuf, PipeError> {
    output.into_path().ok_or_else(|| {
        PipeError::Configuration("Transform did not produce a file".to_string())
    })
}

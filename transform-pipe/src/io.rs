//! Resolution of abstract sources and destinations into concrete endpoints.

use crate::error::PipeError;
use crate::options::WriteOptions;
use crate::types::{Destination, Mode, Source, TransformRequest};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Boxed readable endpoint handed to the transfer pump.
pub type Reader = Box<dyn AsyncRead + Unpin + Send>;

/// Boxed writable endpoint handed to the output pump.
pub type Writer = Box<dyn AsyncWrite + Unpin + Send>;

/// A destination after path resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedDestination {
    /// Write to this file.
    File(PathBuf),
    /// Return bytes in memory.
    Memory,
    /// Write to standard output.
    Stdout,
}

/// Resolves the destination of `request`, rejecting invalid shapes.
///
/// Buffered requests may target their own source file. Streamed requests
/// have no implicit destination and may never write the file they read.
///
/// # Errors
///
/// Returns `PipeError::Configuration` if the request cannot be satisfied.
pub fn resolve_destination(request: &TransformRequest) -> Result<ResolvedDestination, PipeError> {
    let source_path = match &request.source {
        Source::File(path) => Some(path.as_path()),
        Source::Bytes(_) => None,
    };

    match (&request.destination, request.mode) {
        (Destination::Memory, Mode::Buffered) => Ok(ResolvedDestination::Memory),
        (Destination::Memory, Mode::Streamed) => Err(PipeError::Configuration(
            "Streamed transforms cannot return bytes in memory".to_string(),
        )),
        (Destination::Stdout, _) => Ok(ResolvedDestination::Stdout),
        (Destination::SourceFile, Mode::Buffered) => source_path
            .map(|p| ResolvedDestination::File(p.to_path_buf()))
            .ok_or_else(|| {
                PipeError::Configuration(
                    "In-place destination requires a file source".to_string(),
                )
            }),
        (Destination::SourceFile, Mode::Streamed) => Err(PipeError::Configuration(
            "Streamed transforms need an explicit destination".to_string(),
        )),
        (Destination::File(dest), Mode::Streamed) => {
            if let Some(src) = source_path {
                if same_file(src, dest) {
                    return Err(PipeError::Configuration(format!(
                        "Streamed destination cannot be the same as the source: {}",
                        dest.display()
                    )));
                }
            }
            Ok(ResolvedDestination::File(dest.clone()))
        }
        (Destination::File(dest), Mode::Buffered) => Ok(ResolvedDestination::File(dest.clone())),
    }
}

/// Compares two paths, following symlinks and relative components when both exist.
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Produces the full payload of a buffered source.
///
/// # Errors
///
/// Returns `PipeError::Io` with the unchanged `std::io::Error` if the file
/// is missing or unreadable.
pub async fn read_source(source: Source) -> Result<Vec<u8>, PipeError> {
    match source {
        Source::Bytes(bytes) => Ok(bytes),
        Source::File(path) => tokio::fs::read(&path)
            .await
            .map_err(|e| PipeError::io(&path, e)),
    }
}

/// Opens a source for streaming into the tool.
///
/// # Errors
///
/// Returns `PipeError::Io` if the file cannot be opened.
pub async fn open_source(source: Source) -> Result<Reader, PipeError> {
    match source {
        Source::Bytes(bytes) => Ok(Box::new(std::io::Cursor::new(bytes))),
        Source::File(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| PipeError::io(&path, e))?;
            Ok(Box::new(file))
        }
    }
}

/// Opens a destination for streaming out of the tool.
///
/// The file is created or truncated here, before any output exists.
///
/// # Errors
///
/// Returns `PipeError::Io` if the file cannot be opened, or
/// `PipeError::Configuration` for an in-memory destination.
pub async fn open_sink(
    destination: &ResolvedDestination,
    options: &WriteOptions,
) -> Result<Writer, PipeError> {
    match destination {
        ResolvedDestination::File(path) => {
            let file = options
                .open_options()
                .open(path)
                .await
                .map_err(|e| PipeError::io(path, e))?;
            Ok(Box::new(file))
        }
        ResolvedDestination::Stdout => Ok(Box::new(tokio::io::stdout())),
        ResolvedDestination::Memory => Err(PipeError::Configuration(
            "Streamed transforms cannot return bytes in memory".to_string(),
        )),
    }
}

/// Writes a finalized payload to a file in one operation.
///
/// # Errors
///
/// Returns `PipeError::Io` if the payload fails the encoding check or the
/// file cannot be written.
pub async fn write_file(path: &Path, bytes: &[u8], options: &WriteOptions) -> Result<(), PipeError> {
    options
        .check_payload(bytes)
        .map_err(|e| PipeError::io(path, e))?;
    let mut file = options
        .open_options()
        .open(path)
        .await
        .map_err(|e| PipeError::io(path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| PipeError::io(path, e))?;
    file.flush().await.map_err(|e| PipeError::io(path, e))
}

/// Writes a finalized payload to standard output.
///
/// # Errors
///
/// Returns `PipeError::Stream` if standard output is closed.
pub async fn write_stdout(bytes: &[u8]) -> Result<(), PipeError> {
    let mut out = tokio::io::stdout();
    out.write_all(bytes)
        .await
        .map_err(|e| PipeError::Stream {
            stage: "stdout",
            source: e,
        })?;
    out.flush().await.map_err(|e| PipeError::Stream {
        stage: "stdout",
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::WriteFlags;
    use tempfile::TempDir;

    fn file_request(src: &Path, dest: Destination, mode: Mode) -> TransformRequest {
        TransformRequest::new(Source::File(src.to_path_buf()), dest, Vec::<&str>::new())
            .with_mode(mode)
    }

    #[test]
    fn buffered_source_file_resolves_in_place() {
        let req = file_request(Path::new("a.txt"), Destination::SourceFile, Mode::Buffered);
        assert_eq!(
            resolve_destination(&req).unwrap(),
            ResolvedDestination::File(PathBuf::from("a.txt"))
        );
    }

    #[test]
    fn streamed_same_path_is_rejected() {
        let req = file_request(
            Path::new("a.txt"),
            Destination::File(PathBuf::from("a.txt")),
            Mode::Streamed,
        );
        assert!(resolve_destination(&req).unwrap_err().is_configuration());
    }

    #[test]
    fn streamed_alias_through_relative_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("data.bin");
        std::fs::write(&src, b"x").unwrap();
        let alias = dir.path().join(".").join("data.bin");
        let req = file_request(&src, Destination::File(alias), Mode::Streamed);
        assert!(resolve_destination(&req).unwrap_err().is_configuration());
    }

    #[test]
    fn streamed_without_destination_is_rejected() {
        let req = file_request(Path::new("a.txt"), Destination::SourceFile, Mode::Streamed);
        assert!(resolve_destination(&req).unwrap_err().is_configuration());
    }

    #[test]
    fn streamed_to_memory_is_rejected() {
        let req = file_request(Path::new("a.txt"), Destination::Memory, Mode::Streamed);
        assert!(resolve_destination(&req).unwrap_err().is_configuration());
    }

    #[test]
    fn in_place_needs_a_file_source() {
        let req = TransformRequest::new(
            Source::Bytes(Vec::new()),
            Destination::SourceFile,
            Vec::<&str>::new(),
        );
        assert!(resolve_destination(&req).unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn missing_source_surfaces_not_found() {
        let dir = TempDir::new().unwrap();
        let err = read_source(Source::File(dir.path().join("nope")))
            .await
            .unwrap_err();
        match err {
            PipeError::Io { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_file_honours_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        let append = WriteOptions {
            flags: WriteFlags::Append,
            ..WriteOptions::default()
        };
        write_file(&path, b"one", &WriteOptions::default()).await.unwrap();
        write_file(&path, b"two", &append).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"onetwo");

        write_file(&path, b"three", &WriteOptions::default()).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"three");

        let create_new = WriteOptions {
            flags: WriteFlags::CreateNew,
            ..WriteOptions::default()
        };
        assert!(write_file(&path, b"four", &create_new).await.unwrap_err().is_io());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn new_files_get_restrictive_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret.txt");
        write_file(&path, b"s", &WriteOptions::default()).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}

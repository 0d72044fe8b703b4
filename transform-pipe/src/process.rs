//! Drives one transform end-to-end over a single subprocess.
//!
//! The coordinator pumps the source into the tool's stdin while two
//! independent tasks drain stdout and stderr. The three pumps run on their
//! own tasks and meet at one join point; the exit status is only inspected
//! after every pump has finished, so output is never truncated and a tool
//! that floods either channel cannot deadlock the pipeline.

use crate::cancel::{CancelToken, CancellationController};
use crate::error::PipeError;
use crate::invoker::{spawn_tool, ProcessHandle};
use crate::io::{Reader, Writer};
use crate::types::{DiagnosticRouting, Invocation};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinSet;

const CHUNK_SIZE: usize = 16 * 1024;

/// How long a cancelled or failed tool gets between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of one coordinated transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing started yet.
    Idle,
    /// The tool is running; no bytes moved.
    Spawned,
    /// Source bytes are flowing into the tool; output is draining.
    Transferring,
    /// Input is closed; waiting for the output channels to close.
    Draining,
    /// All channels consumed and the exit status is known.
    Closed,
    /// Exit status zero.
    Succeeded,
    /// Non-zero exit status, or a pump failed.
    Failed,
    /// An interrupt aborted the transform.
    Cancelled,
}

impl State {
    /// Returns `true` if the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use State::{Cancelled, Closed, Draining, Failed, Idle, Spawned, Succeeded, Transferring};
        match (self, next) {
            (Succeeded | Failed | Cancelled, _) => false,
            (_, Cancelled | Failed) => true,
            (Idle, Spawned)
            | (Spawned, Transferring)
            | (Transferring, Draining | Closed)
            | (Draining, Closed)
            | (Closed, Succeeded) => true,
            _ => false,
        }
    }

    /// Returns `true` for the three settled states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Output chunks collected in memory, plus their running length.
#[derive(Debug, Default)]
pub struct OutcomeBuffer {
    chunks: Vec<Vec<u8>>,
    len: usize,
}

impl OutcomeBuffer {
    /// Appends one chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.len += chunk.len();
        self.chunks.push(chunk.to_vec());
    }

    /// Total bytes collected so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bytes were collected.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Concatenates all chunks into one contiguous buffer.
    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Where the tool's stdout lands.
pub enum OutputTarget {
    /// Accumulate in memory (buffered mode).
    Buffer(OutcomeBuffer),
    /// Forward to a file or standard output (streamed mode).
    Writer(Writer),
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffer(buffer) => f.debug_tuple("Buffer").field(&buffer.len()).finish(),
            Self::Writer(_) => f.write_str("Writer"),
        }
    }
}

impl OutputTarget {
    /// An empty in-memory target.
    #[must_use]
    pub fn buffer() -> Self {
        Self::Buffer(OutcomeBuffer::default())
    }

    async fn accept(&mut self, chunk: &[u8]) -> Result<(), PipeError> {
        match self {
            Self::Buffer(buffer) => {
                buffer.push(chunk);
                Ok(())
            }
            Self::Writer(writer) => writer.write_all(chunk).await.map_err(|e| PipeError::Stream {
                stage: "destination write",
                source: e,
            }),
        }
    }

    async fn close(&mut self) -> Result<(), PipeError> {
        match self {
            Self::Buffer(_) => Ok(()),
            Self::Writer(writer) => writer.flush().await.map_err(|e| PipeError::Stream {
                stage: "destination flush",
                source: e,
            }),
        }
    }
}

/// Result of a successful coordination.
#[derive(Debug)]
pub struct Completed {
    /// Finalized output for in-memory targets, `None` for writers.
    pub output: Option<Vec<u8>>,
    /// Bytes written into the tool.
    pub bytes_in: u64,
    /// Bytes read from the tool's output channel.
    pub bytes_out: u64,
    /// Wall time from spawn to exit.
    pub duration: Duration,
}

enum Pumped {
    Input(u64),
    Output(OutputTarget, u64),
    Diagnostic(Vec<u8>),
}

#[derive(Default)]
struct Collected {
    bytes_in: u64,
    output: Option<(OutputTarget, u64)>,
    diagnostic: Vec<u8>,
}

/// Runs the lifecycle of exactly one transform.
#[derive(Debug)]
pub struct Coordinator {
    state: State,
    routing: DiagnosticRouting,
}

impl Coordinator {
    /// Creates an idle coordinator for the given diagnostic routing.
    #[must_use]
    pub const fn new(routing: DiagnosticRouting) -> Self {
        Self {
            state: State::Idle,
            routing,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    fn advance(&mut self, next: State) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        tracing::debug!(from = ?self.state, to = ?next, "transform state");
        self.state = next;
    }

    /// Spawns `tool`, pumps `input` through it into `output`, and settles the
    /// outcome from the exit status.
    ///
    /// A coordinator runs once; afterwards [`state`](Self::state) holds the
    /// terminal state.
    ///
    /// # Errors
    ///
    /// `PipeError::Spawn` if the tool cannot start, `PipeError::Transform` on
    /// a non-zero exit, `PipeError::Cancelled` if `cancel` fires first, and
    /// I/O variants if a pump fails. `PipeError::Configuration` if this
    /// coordinator has already run.
    pub async fn run(
        &mut self,
        tool: &Path,
        invocation: &Invocation,
        input: Reader,
        output: OutputTarget,
        cancel: Option<&CancellationController>,
    ) -> Result<Completed, PipeError> {
        if self.state != State::Idle {
            return Err(PipeError::Configuration(format!(
                "coordinator already ran (state {:?})",
                self.state
            )));
        }

        let _active = cancel.map(CancellationController::enter);
        let mut token = cancel.map(CancellationController::token);
        if cancel.is_some_and(CancellationController::is_cancelled) {
            self.advance(State::Cancelled);
            return Err(PipeError::Cancelled);
        }

        let mut handle = match spawn_tool(tool, &invocation.args) {
            Ok(handle) => handle,
            Err(e) => {
                self.advance(State::Failed);
                return Err(e);
            }
        };
        let started = Instant::now();
        self.advance(State::Spawned);

        let stdin = handle.stdin.take().ok_or(PipeError::NoStdin)?;
        let stdout = handle.stdout.take().ok_or(PipeError::NoStdout)?;
        let stderr = handle.stderr.take().ok_or(PipeError::NoStderr)?;

        // Dropping the set aborts any pump still running.
        let mut pumps = JoinSet::new();
        pumps.spawn(pump_output(stdout, output));
        pumps.spawn(pump_diagnostic(stderr));
        pumps.spawn(pump_input(input, stdin));
        self.advance(State::Transferring);

        let settled = tokio::select! {
            joined = self.join(&mut pumps, &mut handle) => Some(joined),
            () = cancelled(&mut token) => None,
        };

        let (collected, status) = match settled {
            Some(Ok(done)) => done,
            Some(Err(e)) => {
                pumps.abort_all();
                shutdown(&mut handle).await;
                self.advance(State::Failed);
                return Err(e);
            }
            None => {
                tracing::warn!(tool = %tool.display(), "interrupt received, terminating tool");
                pumps.abort_all();
                shutdown(&mut handle).await;
                self.advance(State::Cancelled);
                return Err(PipeError::Cancelled);
            }
        };

        let duration = started.elapsed();
        let (target, bytes_out) = collected.output.ok_or(PipeError::NoStdout)?;

        if status.success() {
            self.advance(State::Succeeded);
            tracing::info!(
                tool = %tool.display(),
                bytes_in = collected.bytes_in,
                bytes_out,
                duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                "transform succeeded"
            );
            let output = match target {
                OutputTarget::Buffer(buffer) => Some(buffer.finalize()),
                OutputTarget::Writer(_) => None,
            };
            return Ok(Completed {
                output,
                bytes_in: collected.bytes_in,
                bytes_out,
                duration,
            });
        }

        self.advance(State::Failed);
        let diagnostic = match (self.routing, target) {
            (DiagnosticRouting::Merged, OutputTarget::Buffer(buffer)) => {
                String::from_utf8_lossy(&buffer.finalize()).into_owned()
            }
            _ => String::from_utf8_lossy(&collected.diagnostic).into_owned(),
        };
        tracing::debug!(tool = %tool.display(), exit_code = ?status.code(), "transform failed");
        Err(PipeError::Transform {
            diagnostic,
            exit_code: status.code(),
        })
    }

    /// Waits for all three pumps, then for the exit status.
    async fn join(
        &mut self,
        pumps: &mut JoinSet<Result<Pumped, PipeError>>,
        handle: &mut ProcessHandle,
    ) -> Result<(Collected, std::process::ExitStatus), PipeError> {
        let mut collected = Collected::default();
        while let Some(joined) = pumps.join_next().await {
            let pumped = joined.map_err(|e| PipeError::TaskFailed {
                stage: "pump",
                source: e,
            })??;
            match pumped {
                Pumped::Input(n) => {
                    collected.bytes_in = n;
                    self.advance(State::Draining);
                }
                Pumped::Output(target, n) => collected.output = Some((target, n)),
                Pumped::Diagnostic(text) => collected.diagnostic = text,
            }
        }
        let status = handle.wait().await?;
        self.advance(State::Closed);
        Ok((collected, status))
    }
}

async fn cancelled(token: &mut Option<CancelToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn shutdown(handle: &mut ProcessHandle) {
    if let Err(e) = handle.terminate(TERMINATE_GRACE).await {
        tracing::warn!(tool = %handle.tool().display(), error = %e, "failed to terminate tool");
    }
}

/// Copies the source into the tool, then closes stdin to signal end of input.
///
/// A tool that exits without reading all of its input closes the pipe; that
/// is not an error here, the exit status decides the outcome.
async fn pump_input(mut input: Reader, mut stdin: ChildStdin) -> Result<Pumped, PipeError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf).await.map_err(|e| PipeError::Stream {
            stage: "source read",
            source: e,
        })?;
        if n == 0 {
            break;
        }
        match stdin.write_all(&buf[..n]).await {
            Ok(()) => total += n as u64,
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::debug!(written = total, "tool closed its input early");
                return Ok(Pumped::Input(total));
            }
            Err(e) => {
                return Err(PipeError::Stream {
                    stage: "tool stdin",
                    source: e,
                })
            }
        }
    }
    drop(stdin);
    Ok(Pumped::Input(total))
}

async fn pump_output(mut stdout: ChildStdout, mut target: OutputTarget) -> Result<Pumped, PipeError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = stdout.read(&mut buf).await.map_err(|e| PipeError::Stream {
            stage: "tool stdout",
            source: e,
        })?;
        if n == 0 {
            break;
        }
        target.accept(&buf[..n]).await?;
        total += n as u64;
    }
    target.close().await?;
    Ok(Pumped::Output(target, total))
}

async fn pump_diagnostic(mut stderr: ChildStderr) -> Result<Pumped, PipeError> {
    let mut text = Vec::new();
    stderr
        .read_to_end(&mut text)
        .await
        .map_err(|e| PipeError::Stream {
            stage: "tool stderr",
            source: e,
        })?;
    Ok(Pumped::Diagnostic(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_allows_the_happy_path() {
        let path = [
            State::Idle,
            State::Spawned,
            State::Transferring,
            State::Draining,
            State::Closed,
            State::Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn any_live_state_can_be_cancelled() {
        for state in [
            State::Idle,
            State::Spawned,
            State::Transferring,
            State::Draining,
            State::Closed,
        ] {
            assert!(state.can_transition_to(State::Cancelled));
            assert!(state.can_transition_to(State::Failed));
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for state in [State::Succeeded, State::Failed, State::Cancelled] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(State::Idle));
            assert!(!state.can_transition_to(State::Cancelled));
        }
        assert!(!State::Spawned.can_transition_to(State::Succeeded));
        assert!(!State::Transferring.can_transition_to(State::Succeeded));
    }

    #[test]
    fn outcome_buffer_concatenates_in_order() {
        let mut buffer = OutcomeBuffer::default();
        assert!(buffer.is_empty());
        buffer.push(b"hello, ");
        buffer.push(b"");
        buffer.push(b"world!");
        assert_eq!(buffer.len(), 13);
        assert_eq!(buffer.finalize(), b"hello, world!");
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;

        fn sh(script: &str) -> Invocation {
            Invocation::new(["-c", script])
        }

        fn bytes(data: &[u8]) -> Reader {
            Box::new(std::io::Cursor::new(data.to_vec()))
        }

        #[tokio::test]
        async fn buffered_cat_returns_input() {
            let done = Coordinator::new(DiagnosticRouting::Separate)
                .run(
                    Path::new("cat"),
                    &Invocation::default(),
                    bytes(b"hello, world!"),
                    OutputTarget::buffer(),
                    None,
                )
                .await
                .unwrap();
            assert_eq!(done.output.as_deref(), Some(&b"hello, world!"[..]));
            assert_eq!(done.bytes_in, 13);
            assert_eq!(done.bytes_out, 13);
        }

        #[tokio::test]
        async fn non_zero_exit_carries_stderr() {
            let err = Coordinator::new(DiagnosticRouting::Separate)
                .run(
                    Path::new("sh"),
                    &sh("cat >/dev/null; printf 'bad passphrase' >&2; exit 2"),
                    bytes(b"ciphertext"),
                    OutputTarget::buffer(),
                    None,
                )
                .await
                .unwrap_err();
            match err {
                PipeError::Transform {
                    diagnostic,
                    exit_code,
                } => {
                    assert_eq!(diagnostic, "bad passphrase");
                    assert_eq!(exit_code, Some(2));
                }
                other => panic!("expected Transform, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn merged_routing_reports_output_text() {
            let err = Coordinator::new(DiagnosticRouting::Merged)
                .run(
                    Path::new("sh"),
                    &sh("printf 'BADSIG'; exit 1"),
                    bytes(b""),
                    OutputTarget::buffer(),
                    None,
                )
                .await
                .unwrap_err();
            assert_eq!(err.diagnostic(), Some("BADSIG"));
        }

        #[tokio::test]
        async fn tool_ignoring_input_still_settles() {
            let big = vec![b'x'; 1024 * 1024];
            let done = Coordinator::new(DiagnosticRouting::Separate)
                .run(
                    Path::new("sh"),
                    &sh("printf ok"),
                    bytes(&big),
                    OutputTarget::buffer(),
                    None,
                )
                .await
                .unwrap();
            assert_eq!(done.output.as_deref(), Some(&b"ok"[..]));
        }

        #[tokio::test]
        async fn state_records_how_the_run_settled() {
            let mut ok = Coordinator::new(DiagnosticRouting::Separate);
            assert_eq!(ok.state(), State::Idle);
            ok.run(
                Path::new("cat"),
                &Invocation::default(),
                bytes(b"x"),
                OutputTarget::buffer(),
                None,
            )
            .await
            .unwrap();
            assert_eq!(ok.state(), State::Succeeded);

            let mut failed = Coordinator::new(DiagnosticRouting::Separate);
            failed
                .run(
                    Path::new("sh"),
                    &sh("exit 4"),
                    bytes(b""),
                    OutputTarget::buffer(),
                    None,
                )
                .await
                .unwrap_err();
            assert_eq!(failed.state(), State::Failed);

            let mut unspawnable = Coordinator::new(DiagnosticRouting::Separate);
            unspawnable
                .run(
                    Path::new("/no/such/transform-tool"),
                    &Invocation::default(),
                    bytes(b""),
                    OutputTarget::buffer(),
                    None,
                )
                .await
                .unwrap_err();
            assert_eq!(unspawnable.state(), State::Failed);
        }

        #[tokio::test]
        async fn coordinator_runs_only_once() {
            let mut coordinator = Coordinator::new(DiagnosticRouting::Separate);
            coordinator
                .run(
                    Path::new("cat"),
                    &Invocation::default(),
                    bytes(b"once"),
                    OutputTarget::buffer(),
                    None,
                )
                .await
                .unwrap();
            let err = coordinator
                .run(
                    Path::new("cat"),
                    &Invocation::default(),
                    bytes(b"twice"),
                    OutputTarget::buffer(),
                    None,
                )
                .await
                .unwrap_err();
            assert!(err.is_configuration(), "got {err:?}");
            assert_eq!(coordinator.state(), State::Succeeded);
        }

        #[tokio::test]
        async fn triggered_controller_refuses_to_spawn() {
            let controller = CancellationController::new();
            controller.trigger();
            let mut coordinator = Coordinator::new(DiagnosticRouting::Separate);
            let err = coordinator
                .run(
                    Path::new("cat"),
                    &Invocation::default(),
                    bytes(b"data"),
                    OutputTarget::buffer(),
                    Some(&controller),
                )
                .await
                .unwrap_err();
            assert!(err.is_cancelled());
            assert_eq!(coordinator.state(), State::Cancelled);
            assert_eq!(controller.active(), 0);
        }
    }
}

//! Transport dispatcher for extraction backends.
//!
//! Each backend is an external process addressed by a stable identifier. The
//! dispatcher writes one request line to the backend's stdin, collects its
//! output under a hard timeout, and returns the last well-formed JSON line.
//! Every failure is converted to a canonical [`ErrorCode`] here; raw I/O errors
//! and process signals never escape to the resolver.

use crate::protocol::{self, Envelope, MessageType, Payload, PROTOCOL_VERSION};
use crate::types::ErrorCode;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Upper bound on captured stdout per invocation
const MAX_OUTPUT_BYTES: u64 = 16 * 1024 * 1024;

/// Stderr kept for diagnostics
const STDERR_TAIL_CHARS: usize = 400;

/// How long the pipes may stay open after the backend itself has exited
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Stable backend identifiers
pub mod backend_ids {
    pub const SAFARI: &str = "safari";
    pub const SAFARI_LIVE: &str = "safari-live";
    pub const CHROME: &str = "chrome";
    pub const CHROME_LIVE: &str = "chrome-live";
    pub const DESKTOP_AX: &str = "desktop-ax";
    pub const DESKTOP_OCR: &str = "desktop-ocr";

    pub const ALL: &[&str] = &[SAFARI, SAFARI_LIVE, CHROME, CHROME_LIVE, DESKTOP_AX, DESKTOP_OCR];
}

/// A backend invocation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("{code}: {message}")]
    Failed { code: ErrorCode, message: String },

    #[error("backend invocation cancelled")]
    Cancelled,
}

impl DispatchError {
    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        DispatchError::Failed {
            code,
            message: message.into(),
        }
    }

    /// Canonical code, if this is not a cancellation
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            DispatchError::Failed { code, .. } => Some(*code),
            DispatchError::Cancelled => None,
        }
    }
}

impl From<protocol::ProtocolError> for DispatchError {
    fn from(err: protocol::ProtocolError) -> Self {
        DispatchError::Failed {
            code: err.code,
            message: err.message,
        }
    }
}

/// The parsed reply of one backend invocation
#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    /// The raw JSON line that was selected
    pub line: String,
    /// The same line parsed
    pub value: Value,
    pub elapsed: Duration,
}

/// Seam between the resolver and whatever actually reaches the backends
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request line to `backend` and wait for its reply
    async fn exchange(
        &self,
        backend: &str,
        request: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BackendReply, DispatchError>;

    /// Backend ids this transport can reach
    fn backends(&self) -> Vec<String>;
}

/// Command line used to start a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl BackendCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Process-backed transport
pub struct Dispatcher {
    commands: BTreeMap<String, BackendCommand>,
}

struct RawOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: ExitStatus,
}

enum Outcome {
    Finished(ExitStatus),
    Io(std::io::Error),
    TimedOut,
    Cancelled,
}

impl Dispatcher {
    pub fn new(commands: BTreeMap<String, BackendCommand>) -> Self {
        Self { commands }
    }

    /// Register or replace the command for a backend id
    pub fn register(&mut self, backend: impl Into<String>, command: BackendCommand) {
        self.commands.insert(backend.into(), command);
    }

    /// Run one backend process to completion, timeout or cancellation.
    ///
    /// The child is always killed (if still running) and reaped before this
    /// returns. Its process group is killed as well, so helpers it forked do
    /// not outlive the call either.
    pub async fn invoke(
        &self,
        backend: &str,
        request: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BackendReply, DispatchError> {
        let command = self.commands.get(backend).ok_or_else(|| {
            DispatchError::failed(
                ErrorCode::ExtensionUnavailable,
                format!("no command configured for backend '{}'", backend),
            )
        })?;

        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let started = Instant::now();
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so helpers the backend forks can be killed with it
        #[cfg(unix)]
        process.process_group(0);

        let mut child = process
            .spawn()
            .map_err(|e| {
                debug!("Failed to spawn backend {} ({}): {}", backend, command.program.display(), e);
                DispatchError::failed(
                    ErrorCode::ExtensionUnavailable,
                    format!("failed to start backend '{}': {}", backend, e),
                )
            })?;

        let pid = child.id();
        debug!(
            "Spawned backend {} (pid {:?}) with {}ms timeout",
            backend,
            pid,
            timeout.as_millis()
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let outcome = {
            let io = collect_output(
                &mut child,
                stdin,
                (stdout, &mut stdout_buf),
                (stderr, &mut stderr_buf),
                request.as_bytes(),
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancelled,
                result = tokio::time::timeout(timeout, io) => match result {
                    Ok(Ok(status)) => Outcome::Finished(status),
                    Ok(Err(e)) => Outcome::Io(e),
                    Err(_) => Outcome::TimedOut,
                },
            }
        };

        // Whatever is left of the group goes, the backend included when it is still running
        kill_process_group(pid, backend);
        if !matches!(outcome, Outcome::Finished(_)) {
            reap(&mut child, backend).await;
        }

        let elapsed = started.elapsed();
        match outcome {
            Outcome::Cancelled => {
                debug!("Backend {} cancelled after {:?}", backend, elapsed);
                Err(DispatchError::Cancelled)
            }
            Outcome::TimedOut => {
                warn!("Backend {} timed out after {}ms", backend, timeout.as_millis());
                Err(DispatchError::failed(
                    ErrorCode::Timeout,
                    format!("backend '{}' did not respond within {}ms", backend, timeout.as_millis()),
                ))
            }
            Outcome::Io(e) => Err(DispatchError::failed(
                ErrorCode::ExtensionUnavailable,
                format!("I/O error talking to backend '{}': {}", backend, e),
            )),
            Outcome::Finished(status) => interpret_output(
                backend,
                RawOutput {
                    stdout: stdout_buf,
                    stderr: stderr_buf,
                    status,
                },
                elapsed,
            ),
        }
    }

    /// Ask a backend whether it is ready and which protocol version it speaks
    pub async fn ping(&self, backend: &str, timeout: Duration) -> PingReport {
        ping_backend(self, backend, timeout).await
    }
}

#[async_trait]
impl Transport for Dispatcher {
    async fn exchange(
        &self,
        backend: &str,
        request: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BackendReply, DispatchError> {
        self.invoke(backend, request, timeout, cancel).await
    }

    fn backends(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }
}

/// Feed the request and read both pipes until the backend exits.
///
/// Pipes are drained for at most [`PIPE_DRAIN_GRACE`] after the exit, since a
/// helper left behind by the backend may keep them open.
async fn collect_output(
    child: &mut Child,
    stdin: Option<ChildStdin>,
    (stdout, stdout_buf): (Option<ChildStdout>, &mut Vec<u8>),
    (stderr, stderr_buf): (Option<ChildStderr>, &mut Vec<u8>),
    request: &[u8],
) -> std::io::Result<ExitStatus> {
    let write = async move {
        if let Some(mut stdin) = stdin {
            // A backend that ignores stdin may close it early; that is not a failure
            if let Err(e) = stdin.write_all(request).await {
                trace!("Backend stdin write failed: {}", e);
                return;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                trace!("Backend stdin write failed: {}", e);
                return;
            }
            let _ = stdin.shutdown().await;
        }
    };

    let read_stdout = read_limited(stdout, stdout_buf);
    let read_stderr = read_limited(stderr, stderr_buf);
    tokio::pin!(write, read_stdout, read_stderr);

    let (mut written, mut stdout_done, mut stderr_done) = (false, false, false);
    let status = loop {
        tokio::select! {
            _ = &mut write, if !written => {
                written = true;
            }
            result = &mut read_stdout, if !stdout_done => {
                result?;
                stdout_done = true;
            }
            result = &mut read_stderr, if !stderr_done => {
                result?;
                stderr_done = true;
            }
            status = child.wait() => break status?,
        }
    };

    let drain = async {
        if !stdout_done {
            (&mut read_stdout).await?;
        }
        if !stderr_done {
            (&mut read_stderr).await?;
        }
        Ok::<_, std::io::Error>(())
    };
    match tokio::time::timeout(PIPE_DRAIN_GRACE, drain).await {
        Ok(result) => result?,
        Err(_) => debug!(
            "Backend pipes still open {}ms after exit, keeping the output read so far",
            PIPE_DRAIN_GRACE.as_millis()
        ),
    }
    Ok(status)
}

/// Append everything `reader` yields to `buffer`. Bytes land in `buffer` as
/// they arrive, so a read cut short keeps what was already received.
async fn read_limited<R: AsyncRead + Unpin>(
    reader: Option<R>,
    buffer: &mut Vec<u8>,
) -> std::io::Result<()> {
    if let Some(reader) = reader {
        let mut reader = reader.take(MAX_OUTPUT_BYTES);
        while reader.read_buf(buffer).await? > 0 {}
    }
    Ok(())
}

/// SIGKILL the backend's process group, which shares the backend's pid
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>, backend: &str) {
    let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    if unsafe { libc::killpg(pid, libc::SIGKILL) } == 0 {
        debug!("Killed remaining processes of backend {}", backend);
    } else {
        trace!("No processes left in the group of backend {}", backend);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>, _backend: &str) {}

async fn reap(child: &mut Child, backend: &str) {
    if let Err(e) = child.start_kill() {
        trace!("Kill for backend {} failed (already exited?): {}", backend, e);
    }
    match child.wait().await {
        Ok(status) => debug!("Reaped backend {} ({})", backend, status),
        Err(e) => warn!("Failed to reap backend {}: {}", backend, e),
    }
}

fn interpret_output(
    backend: &str,
    output: RawOutput,
    elapsed: Duration,
) -> Result<BackendReply, DispatchError> {
    let stdout = String::from_utf8_lossy(&output.stdout);

    if let Some((line, value)) = last_json_line(&stdout) {
        if !output.status.success() {
            debug!(
                "Backend {} exited with {} but produced a parseable reply",
                backend, output.status
            );
        }
        return Ok(BackendReply {
            line: line.to_string(),
            value,
            elapsed,
        });
    }

    let stderr = stderr_tail(&output.stderr);
    if output.status.success() {
        Err(DispatchError::failed(
            ErrorCode::PayloadInvalid,
            format!("backend '{}' produced no JSON reply{}", backend, stderr),
        ))
    } else {
        Err(DispatchError::failed(
            ErrorCode::ExtensionUnavailable,
            format!("backend '{}' exited with {}{}", backend, output.status, stderr),
        ))
    }
}

/// Find the last line of `output` that parses as a JSON object
pub fn last_json_line(output: &str) -> Option<(&str, Value)> {
    output.lines().rev().find_map(|line| {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) if value.is_object() => Some((trimmed, value)),
            _ => None,
        }
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }
    let count = text.chars().count();
    let tail: String = text.chars().skip(count.saturating_sub(STDERR_TAIL_CHARS)).collect();
    format!(": {}", tail)
}

/// Send a request envelope to a browser bridge and decode its reply envelope.
///
/// Codec failures are returned with the codec's own code. An `extension-error`
/// reply is turned into a failure carrying the backend-reported code.
pub async fn exchange_envelope<T: Transport + ?Sized>(
    transport: &T,
    backend: &str,
    request: &Envelope,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Envelope, DispatchError> {
    let line = request.to_json()?;
    let reply = transport.exchange(backend, &line, timeout, cancel).await?;
    let envelope = protocol::decode(&reply.line)?;

    match &envelope.payload {
        Payload::Error(error) => {
            let code = ErrorCode::parse(&error.code).unwrap_or(ErrorCode::ExtensionUnavailable);
            Err(DispatchError::failed(
                code,
                format!("backend '{}' reported {}: {}", backend, error.code, error.message),
            ))
        }
        _ => {
            protocol::validate(&envelope, MessageType::ExtensionCaptureResult)?;
            Ok(envelope)
        }
    }
}

/// Readiness of one backend
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PingReport {
    pub backend: String,
    pub ready: bool,
    pub protocol_version: Option<String>,
    pub latency_ms: u64,
    pub error: Option<ErrorCode>,
    pub message: Option<String>,
}

/// Ping any transport. Browser bridges must report the pinned protocol version.
pub async fn ping_backend<T: Transport + ?Sized>(
    transport: &T,
    backend: &str,
    timeout: Duration,
) -> PingReport {
    let request = serde_json::json!({
        "command": "ping",
        "protocolVersion": PROTOCOL_VERSION,
    })
    .to_string();
    let started = Instant::now();
    let never = CancellationToken::new();
    let result = transport.exchange(backend, &request, timeout, &never).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(reply) => {
            let ok = reply.value["ok"].as_bool().unwrap_or(false);
            let version = reply.value["protocolVersion"].as_str().map(str::to_string);
            let speaks_envelopes = !matches!(
                backend,
                backend_ids::DESKTOP_AX | backend_ids::DESKTOP_OCR
            );

            let (ready, error, message) = if !ok {
                (
                    false,
                    Some(ErrorCode::ExtensionUnavailable),
                    reply.value["message"].as_str().map(str::to_string),
                )
            } else if speaks_envelopes && version.as_deref() != Some(PROTOCOL_VERSION) {
                (
                    false,
                    Some(ErrorCode::ProtocolVersion),
                    Some(format!(
                        "expected protocol version '{}', got {:?}",
                        PROTOCOL_VERSION, version
                    )),
                )
            } else {
                (true, None, None)
            };

            PingReport {
                backend: backend.to_string(),
                ready,
                protocol_version: version,
                latency_ms,
                error,
                message,
            }
        }
        Err(e) => PingReport {
            backend: backend.to_string(),
            ready: false,
            protocol_version: None,
            latency_ms,
            error: e.code(),
            message: Some(e.to_string()),
        },
    }
}

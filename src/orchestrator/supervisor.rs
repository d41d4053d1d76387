//! Worker process supervision.
//!
//! Once a driver has spawned a worker, [`supervise`] splits its stdio:
//!
//! - stdin is fed by a writer task draining an `mpsc` channel, so callers
//!   never block on a full pipe while holding registry state.
//! - stdout and stderr are framed into lines by [`ConsoleCodec`] and every
//!   non-blank line is handed to the registry in arrival order.
//! - after both streams close, the exit status is collected and reported
//!   exactly once through [`SessionRegistry::on_process_exit`].
//!
//! The returned [`ProcessHandle`] is what the session owns. Releasing it
//! cancels the termination token, which makes the monitor signal the
//! process (SIGTERM, then kill after [`TERMINATE_GRACE`]).

use std::process::ExitStatus;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::LaunchedWorker;
use crate::orchestrator::fanout::is_blank;
use crate::orchestrator::registry::SessionRegistry;
use crate::{AppError, Result};

/// Maximum console line length accepted from a worker: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Time a worker gets between SIGTERM and a forced kill.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(10);

/// Input lines buffered per worker before `deliver_input` waits.
const INPUT_BUFFER: usize = 64;

/// Line codec for worker console streams.
///
/// Splits on `\n` and strips a trailing `\r`, so both `\r\n` and `\n`
/// terminators yield clean lines. Lines longer than [`MAX_LINE_BYTES`]
/// are reported as errors and discarded up to the next newline.
#[derive(Debug)]
pub struct ConsoleCodec(LinesCodec);

impl ConsoleCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for ConsoleCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ConsoleCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}

/// Exclusive handle to a supervised worker process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    input_tx: mpsc::Sender<String>,
    terminate: CancellationToken,
}

impl ProcessHandle {
    /// OS process id, if the process was still alive when supervised.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Sender feeding the worker's stdin; each item is written plus `\n`.
    #[must_use]
    pub fn input(&self) -> mpsc::Sender<String> {
        self.input_tx.clone()
    }

    /// Ask the monitor to terminate the process without giving up the handle.
    pub fn terminate(&self) {
        self.terminate.cancel();
    }

    /// Signal termination and discard the handle.
    pub fn release(self) {
        self.terminate.cancel();
    }
}

/// Take over a launched worker's stdio and exit notification.
///
/// # Errors
///
/// Returns `AppError::Launch` if any stdio stream was not piped.
pub fn supervise(
    identity: &str,
    worker: LaunchedWorker,
    registry: SessionRegistry,
) -> Result<ProcessHandle> {
    let LaunchedWorker { mut child, .. } = worker;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture worker stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture worker stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture worker stderr".into()))?;

    let pid = child.id();
    let terminate = CancellationToken::new();
    let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);

    tokio::spawn(run_writer(identity.to_owned(), stdin, input_rx));

    let identity = identity.to_owned();
    let cancel = terminate.clone();
    tokio::spawn(async move {
        let stdout = FramedRead::new(stdout, ConsoleCodec::new());
        let stderr = FramedRead::new(stderr, ConsoleCodec::new());
        let mut lines = futures_util::stream::select(stdout, stderr);
        let mut terminated = false;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled(), if !terminated => {
                    terminated = true;
                    terminate_child(&identity, &mut child).await;
                }

                item = lines.next() => match item {
                    None => break,
                    Some(Ok(line)) => {
                        if !is_blank(&line) {
                            debug!(identity, "{line}");
                            registry.on_console_line(&identity, line).await;
                        }
                    }
                    Some(Err(AppError::Protocol(msg))) => {
                        warn!(identity, error = msg.as_str(), "console framing error, skipping");
                    }
                    Some(Err(err)) => {
                        warn!(identity, %err, "console stream error, stopping reader");
                        break;
                    }
                },
            }
        }

        let status = wait_for_exit(&identity, &mut child, &cancel, terminated).await;
        registry.on_process_exit(&identity, status).await;
    });

    Ok(ProcessHandle {
        pid,
        input_tx,
        terminate,
    })
}

/// Write queued input lines to the worker's stdin until the channel closes.
async fn run_writer(identity: String, mut stdin: ChildStdin, mut input_rx: mpsc::Receiver<String>) {
    while let Some(text) = input_rx.recv().await {
        let mut bytes = text.into_bytes();
        bytes.push(b'\n');

        if let Err(err) = stdin.write_all(&bytes).await {
            warn!(identity, %err, "write to worker stdin failed");
            break;
        }
        if let Err(err) = stdin.flush().await {
            warn!(identity, %err, "flush of worker stdin failed");
            break;
        }
    }
    debug!(identity, "stdin writer stopped");
}

async fn wait_for_exit(
    identity: &str,
    child: &mut Child,
    cancel: &CancellationToken,
    already_terminated: bool,
) -> Option<ExitStatus> {
    let result = if already_terminated {
        child.wait().await
    } else {
        tokio::select! {
            result = child.wait() => result,
            () = cancel.cancelled() => {
                terminate_child(identity, child).await;
                child.wait().await
            }
        }
    };

    match result {
        Ok(status) => Some(status),
        Err(err) => {
            warn!(identity, %err, "error waiting for worker process");
            None
        }
    }
}

/// SIGTERM the process, then kill it if it outlives [`TERMINATE_GRACE`].
async fn terminate_child(identity: &str, child: &mut Child) {
    info!(identity, pid = child.id().unwrap_or(0), "terminating worker process");

    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(identity, %err, "failed to send SIGTERM");
        } else if tokio::time::timeout(TERMINATE_GRACE, child.wait())
            .await
            .is_ok()
        {
            return;
        }
    }

    if let Err(err) = child.kill().await {
        warn!(identity, %err, "failed to kill worker process");
    }
}

/// Human-readable description of an exit status.
#[must_use]
pub fn describe_exit(status: Option<ExitStatus>) -> String {
    status.map_or_else(
        || "status unknown".to_owned(),
        |s| {
            if s.success() {
                "exited normally (code 0)".to_owned()
            } else {
                s.code().map_or_else(
                    || "terminated by signal".to_owned(),
                    |c| format!("exited with code {c}"),
                )
            }
        },
    )
}

//! Shared artifact cache helpers for worker drivers.
//!
//! - [`fetch_if_stale`] downloads a URL only when its `Last-Modified`
//!   header differs from the stored freshness marker, streaming into a
//!   `.part` temp file in the target directory and renaming on completion.
//! - [`run_java_step`] runs a one-shot patch or build tool and fails on a
//!   non-zero exit.
//! - [`launch_command`] builds the worker command line with piped stdio and
//!   `kill_on_drop(true)`.
//!
//! None of these helpers are safe to run concurrently against the same
//! cache; callers rely on the acquisition queue for that.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{AppError, Result};

/// Connect timeout for artifact downloads.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Stderr lines kept in a failed tool step's error message.
const STDERR_TAIL: usize = 5;

/// Build the HTTP client shared by all drivers.
///
/// # Errors
///
/// Returns `AppError::Config` if the TLS backend cannot be initialised.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))
}

/// Create `dir` and all missing parents.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory cannot be created.
pub async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|err| AppError::Io(format!("failed to create {}: {err}", dir.display())))
}

/// Read a freshness marker; a missing or unreadable marker reads as empty.
pub async fn read_marker(marker: &Path) -> String {
    tokio::fs::read_to_string(marker)
        .await
        .map(|text| text.trim().to_owned())
        .unwrap_or_default()
}

/// Record the freshness value of a completed artifact.
///
/// # Errors
///
/// Returns `AppError::Io` if the marker cannot be written.
pub async fn write_marker(marker: &Path, stamp: &str) -> Result<()> {
    tokio::fs::write(marker, stamp)
        .await
        .map_err(|err| AppError::Io(format!("failed to write {}: {err}", marker.display())))
}

/// Download `url` to `target` unless the cached copy is current.
///
/// Returns `Ok(None)` when the server's `Last-Modified` equals the stored
/// marker and `target` exists. Otherwise streams the body into place and
/// returns `Ok(Some(stamp))`; the caller writes the marker once any
/// follow-up steps have succeeded.
///
/// # Errors
///
/// Returns `AppError::Acquisition` on HTTP failures and `AppError::Io` if
/// the artifact cannot be written.
pub async fn fetch_if_stale(
    client: &reqwest::Client,
    url: &str,
    target: &Path,
    marker: &Path,
) -> Result<Option<String>> {
    let response = client
        .get(url)
        .send()
        .await?
        .error_for_status()
        .map_err(|err| AppError::Acquisition(format!("download of {url} failed: {err}")))?;

    let stamp = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    if !stamp.is_empty() && stamp == read_marker(marker).await && target.exists() {
        debug!(url, target = %target.display(), "cached artifact is current");
        return Ok(None);
    }

    let parent = target
        .parent()
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", target.display())))?;
    ensure_dir(parent).await?;

    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let part = tempfile::Builder::new()
        .prefix(&file_name)
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;
    let (file, part_path) = part.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    info!(url, target = %target.display(), "downloading artifact");
    let mut body = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    part_path.persist(target).map_err(|err| {
        AppError::Io(format!("failed to persist {}: {err}", target.display()))
    })?;
    info!(target = %target.display(), bytes = written, "artifact downloaded");

    Ok(Some(stamp))
}

/// Heap flags for a worker with `memory` megabytes.
#[must_use]
pub fn heap_flags(memory: u32) -> [String; 2] {
    [format!("-Xms{memory}M"), format!("-Xmx{memory}M")]
}

/// Run a one-shot Java tool in `cwd` and wait for it to finish.
///
/// # Errors
///
/// Returns `AppError::Acquisition` if the tool cannot be started or exits
/// unsuccessfully.
pub async fn run_java_step(java: &str, args: &[String], cwd: &Path) -> Result<()> {
    info!(java, ?args, cwd = %cwd.display(), "running tool step");

    let output = Command::new(java)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| AppError::Acquisition(format!("failed to run {java}: {err}")))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL)..].join(" | ");
    Err(AppError::Acquisition(format!(
        "tool step exited with {}: {tail}",
        output.status
    )))
}

/// Remove a file, treating "not found" as success.
///
/// # Errors
///
/// Returns `AppError::Io` for any other removal failure.
pub async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(format!(
            "failed to remove {}: {err}",
            path.display()
        ))),
    }
}

/// Per-instance server directory layout.
#[derive(Debug, Clone)]
pub struct ServerLayout {
    /// `servers/<kind>_<version>_<name>`.
    pub root: PathBuf,
    /// World storage.
    pub worlds: PathBuf,
    /// Plugin directory.
    pub plugins: PathBuf,
    /// Working directory of the worker process.
    pub configurations: PathBuf,
}

impl ServerLayout {
    /// Layout for one server instance under `servers_dir`.
    #[must_use]
    pub fn new(servers_dir: &Path, kind: &str, version: &str, name: &str) -> Self {
        let root = servers_dir.join(format!("{kind}_{version}_{name}"));
        Self {
            worlds: root.join("worlds"),
            plugins: root.join("plugins"),
            configurations: root.join("configurations"),
            root,
        }
    }

    /// Console log written by the worker.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.configurations.join("logs").join("latest.log")
    }

    /// Create every directory of the layout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if a directory cannot be created.
    pub async fn create(&self) -> Result<()> {
        for dir in [&self.worlds, &self.plugins, &self.configurations] {
            ensure_dir(dir).await?;
        }
        Ok(())
    }
}

/// Build the worker command line.
///
/// `java <heap> <jvm_flags> -jar <jar> --port <port> --plugins <plugins>
/// --world-dir <worlds> nogui`, run in the layout's configurations dir.
#[must_use]
pub fn launch_command(
    java: &str,
    jvm_flags: &[String],
    jar: &Path,
    memory: u32,
    port: u16,
    layout: &ServerLayout,
) -> Command {
    let mut cmd = Command::new(java);
    cmd.args(heap_flags(memory))
        .args(jvm_flags)
        .arg("-jar")
        .arg(jar)
        .arg("--port")
        .arg(port.to_string())
        .arg("--plugins")
        .arg(&layout.plugins)
        .arg("--world-dir")
        .arg(&layout.worlds)
        .arg("nogui")
        .current_dir(&layout.configurations)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Spawn a prepared command.
///
/// # Errors
///
/// Returns `AppError::Launch` if the process cannot be started.
pub fn spawn(mut cmd: Command) -> Result<tokio::process::Child> {
    cmd.spawn()
        .map_err(|err| AppError::Launch(format!("failed to spawn worker: {err}")))
}

//! Session registry.
//!
//! Single source of truth for active sessions. Every state transition goes
//! through [`SessionRegistry`], which validates it against the session's
//! current state, fans out the resulting event, and removes the session as
//! soon as a terminal event has been delivered.
//!
//! All state lives behind one `tokio::sync::Mutex`. Admission checks and
//! insertion happen under the same guard, so no two concurrent requests can
//! both observe an identity or port as free. Slow work (acquisition, log
//! reads, stdin writes) happens outside the guard.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::driver::{DriverSet, LaunchedWorker};
use crate::models::event::SessionEvent;
use crate::models::session::{SessionConfig, SessionState, SessionSummary};
use crate::orchestrator::acquisition::{AcquisitionQueue, AcquisitionTask};
use crate::orchestrator::fanout::{console_lines, ClientId, Observer, SubscriberSet};
use crate::orchestrator::identity::{derive_identity, same_identity_key};
use crate::orchestrator::supervisor::{self, describe_exit, ProcessHandle};
use crate::{AppError, Result};

/// Grace given to terminated workers to report their exit at shutdown.
const TERMINATION_DRAIN: Duration = Duration::from_secs(15);

/// Registry tunables derived from [`GlobalConfig`].
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Control-plane listening port, never assignable to a worker.
    pub control_port: u16,
    /// Hex characters kept from the identity hash.
    pub identity_length: usize,
    /// Upper bound on a driver's launch step.
    pub startup_timeout: Duration,
    /// Removed sessions whose log location stays readable.
    pub retained_logs: usize,
    /// Console command written to running workers at shutdown.
    pub stop_command: String,
}

impl RegistrySettings {
    /// Build settings from the global config and the bound control port.
    #[must_use]
    pub fn from_config(config: &GlobalConfig, control_port: u16) -> Self {
        Self {
            control_port,
            identity_length: config.identity_length,
            startup_timeout: config.startup_timeout(),
            retained_logs: config.retained_logs,
            stop_command: config.stop_command.clone(),
        }
    }
}

#[derive(Debug)]
struct Session {
    config: SessionConfig,
    state: SessionState,
    process: Option<ProcessHandle>,
    log_file: Option<PathBuf>,
    subscribers: SubscriberSet,
    created_at: DateTime<Utc>,
}

impl Session {
    fn advance(&mut self, identity: &str, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "session {identity}: {} -> {}",
                self.state.as_str(),
                next.as_str()
            )));
        }
        debug!(
            identity,
            from = self.state.as_str(),
            to = next.as_str(),
            "session state changed"
        );
        self.state = next;
        Ok(())
    }

    fn console(&self, identity: &str, message: impl Into<String>) {
        self.subscribers.broadcast(&SessionEvent::ConsoleLine {
            identity: identity.to_owned(),
            message: message.into(),
        });
    }

    fn summary(&self, identity: &str) -> SessionSummary {
        SessionSummary {
            identity: identity.to_owned(),
            name: self.config.name.clone(),
            version: self.config.version.clone(),
            port: self.config.port,
            kind: self.config.kind.clone(),
            state: self.state,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<String, Session>,
    retained_logs: VecDeque<(String, PathBuf)>,
}

impl RegistryState {
    fn check_conflicts(
        &self,
        identity: &str,
        config: &SessionConfig,
        control_port: u16,
    ) -> Result<()> {
        if let Some(existing) = self.sessions.get(identity) {
            if !same_identity_key(&existing.config, config) {
                warn!(
                    identity,
                    existing = %existing.config.label(),
                    requested = %config.label(),
                    "identity collision between different configurations"
                );
            }
            return Err(AppError::DuplicateConfiguration(format!(
                "identity {identity} is in use"
            )));
        }

        if config.port == control_port {
            return Err(AppError::DuplicateConfiguration(format!(
                "port {} is the control-plane port",
                config.port
            )));
        }

        if let Some((holder, _)) = self
            .sessions
            .iter()
            .find(|(_, session)| session.config.port == config.port)
        {
            return Err(AppError::DuplicateConfiguration(format!(
                "port {} is held by session {holder}",
                config.port
            )));
        }

        Ok(())
    }

    fn retain_log(&mut self, identity: &str, path: PathBuf, capacity: usize) {
        if capacity == 0 {
            return;
        }
        self.retained_logs.retain(|(id, _)| id != identity);
        self.retained_logs.push_back((identity.to_owned(), path));
        while self.retained_logs.len() > capacity {
            self.retained_logs.pop_front();
        }
    }

    fn log_location(&self, identity: &str) -> Option<PathBuf> {
        if let Some(session) = self.sessions.get(identity) {
            return session.log_file.clone();
        }
        self.retained_logs
            .iter()
            .rev()
            .find(|(id, _)| id == identity)
            .map(|(_, path)| path.clone())
    }
}

/// Registry of active sessions.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SessionRegistry {
    state: Arc<Mutex<RegistryState>>,
    drivers: Arc<DriverSet>,
    queue: AcquisitionQueue,
    settings: Arc<RegistrySettings>,
    drained: Arc<Notify>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("drivers", &self.drivers)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create an empty registry feeding the given acquisition queue.
    #[must_use]
    pub fn new(drivers: DriverSet, queue: AcquisitionQueue, settings: RegistrySettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            drivers: Arc::new(drivers),
            queue,
            settings: Arc::new(settings),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Admit a new session and queue its acquisition.
    ///
    /// `creator` becomes the first subscriber and receives the
    /// `Initialized` event before this call returns.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidConfiguration` if `name` or `version` is not a
    ///   safe path component.
    /// - `AppError::DuplicateConfiguration` if the identity or port is in use.
    /// - `AppError::UnknownWorkerType` if no driver handles `config.kind`.
    /// - `AppError::Acquisition` if the queue worker has stopped.
    pub async fn create(&self, config: SessionConfig, creator: Observer) -> Result<String> {
        config.validate()?;
        let identity = derive_identity(&config, self.settings.identity_length);
        let mut state = self.state.lock().await;

        state.check_conflicts(&identity, &config, self.settings.control_port)?;
        let driver = self.drivers.get(&config.kind)?;

        let mut subscribers = SubscriberSet::default();
        subscribers.insert(creator);
        subscribers.broadcast(&SessionEvent::Initialized {
            identity: identity.clone(),
        });

        let label = format!("{identity} {}", config.label());
        let procedure = {
            let registry = self.clone();
            let identity = identity.clone();
            let config = config.clone();
            async move {
                registry.begin_acquisition(&identity).await?;
                driver.acquire(&config).await
            }
        };
        let on_complete = {
            let registry = self.clone();
            let identity = identity.clone();
            move |outcome| async move { registry.on_acquired(&identity, outcome).await }
        };

        info!(identity, session = %config.label(), port = config.port, "session created");
        state.sessions.insert(
            identity.clone(),
            Session {
                config,
                state: SessionState::Pending,
                process: None,
                log_file: None,
                subscribers,
                created_at: Utc::now(),
            },
        );

        if let Err(err) = self
            .queue
            .enqueue(AcquisitionTask::new(label, procedure, on_complete))
        {
            state.sessions.remove(&identity);
            return Err(err);
        }

        Ok(identity)
    }

    async fn begin_acquisition(&self, identity: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let session = state.sessions.get_mut(identity).ok_or_else(|| {
            AppError::InvalidTransition(format!("session {identity} no longer exists"))
        })?;
        session.advance(identity, SessionState::Acquiring)
    }

    /// Handle the outcome of a session's acquisition task.
    ///
    /// On success the session moves to `Starting`, the driver's launch step
    /// runs under the startup timeout, and a spawned process moves the
    /// session to `Running`. Any failure ends the session as `Failed`.
    pub async fn on_acquired(&self, identity: &str, outcome: Result<()>) {
        let span = info_span!("session", identity);
        self.acquired_inner(identity, outcome).instrument(span).await;
    }

    async fn acquired_inner(&self, identity: &str, outcome: Result<()>) {
        if let Err(err) = outcome {
            self.fail(identity, format!("Failed to prepare server: {err}"))
                .await;
            return;
        }

        let config = {
            let mut state = self.state.lock().await;
            let Some(session) = state.sessions.get_mut(identity) else {
                warn!("acquisition finished for unknown session");
                return;
            };
            if let Err(err) = session.advance(identity, SessionState::Starting) {
                warn!(%err, "ignoring acquisition outcome");
                return;
            }
            let config = session.config.clone();
            session.console(
                identity,
                format!(
                    "Starting {} {} (server name: {})...",
                    config.kind, config.version, config.name
                ),
            );
            config
        };

        let driver = match self.drivers.get(&config.kind) {
            Ok(driver) => driver,
            Err(err) => {
                self.fail(identity, format!("Failed to start server: {err}"))
                    .await;
                return;
            }
        };

        match tokio::time::timeout(self.settings.startup_timeout, driver.launch(&config)).await {
            Ok(Ok(worker)) => self.attach(identity, worker).await,
            Ok(Err(err)) => {
                self.fail(identity, format!("Failed to start server: {err}"))
                    .await;
            }
            Err(_) => {
                self.fail(
                    identity,
                    format!(
                        "Failed to start server: launch did not complete within {}s",
                        self.settings.startup_timeout.as_secs()
                    ),
                )
                .await;
            }
        }
    }

    async fn attach(&self, identity: &str, worker: LaunchedWorker) {
        let log_file = worker.log_file.clone();
        let mut state = self.state.lock().await;

        if !state.sessions.contains_key(identity) {
            warn!(identity, "launched worker for unknown session, dropping it");
            return;
        }

        // Supervisor tasks need the lock to report, so they cannot observe
        // the session before the handle is stored below.
        let handle = match supervisor::supervise(identity, worker, self.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                self.finish(
                    &mut state,
                    identity,
                    SessionState::Failed,
                    Some(format!("Failed to start server: {err}")),
                );
                return;
            }
        };

        let Some(session) = state.sessions.get_mut(identity) else {
            return;
        };
        if let Err(err) = session.advance(identity, SessionState::Running) {
            warn!(%err, "ignoring launched worker");
            handle.release();
            return;
        }
        info!(
            identity,
            pid = handle.pid().unwrap_or(0),
            log = %log_file.display(),
            "worker running"
        );
        session.process = Some(handle);
        session.log_file = Some(log_file);
    }

    async fn fail(&self, identity: &str, notice: String) {
        let mut state = self.state.lock().await;
        self.finish(&mut state, identity, SessionState::Failed, Some(notice));
    }

    /// Apply a terminal transition, fan out the terminal event, and remove
    /// the session.
    fn finish(
        &self,
        state: &mut RegistryState,
        identity: &str,
        terminal: SessionState,
        notice: Option<String>,
    ) {
        let Some(session) = state.sessions.get_mut(identity) else {
            debug!(identity, "terminal event for unknown session ignored");
            return;
        };
        if let Err(err) = session.advance(identity, terminal) {
            warn!(%err, "ignoring terminal event");
            return;
        }

        if let Some(notice) = notice {
            warn!(identity, reason = notice.as_str(), "session failed");
            session.console(identity, notice);
        }
        let event = match terminal {
            SessionState::Closed => SessionEvent::Closed {
                identity: identity.to_owned(),
            },
            _ => SessionEvent::Failed {
                identity: identity.to_owned(),
            },
        };
        session.subscribers.broadcast(&event);

        let Some(session) = state.sessions.remove(identity) else {
            return;
        };
        if let Some(process) = session.process {
            process.release();
        }
        if let Some(path) = session.log_file {
            state.retain_log(identity, path, self.settings.retained_logs);
        }
        info!(identity, state = terminal.as_str(), "session removed");
        self.drained.notify_waiters();
    }

    /// Write one line of input to a running session's process.
    ///
    /// Silently ignored unless the session is `Running`. Never waits on the
    /// worker: input is dropped when its stdin buffer is full.
    pub async fn deliver_input(&self, identity: &str, text: String) {
        let input = {
            let state = self.state.lock().await;
            match state.sessions.get(identity) {
                Some(session) if session.state == SessionState::Running => {
                    session.process.as_ref().map(ProcessHandle::input)
                }
                _ => None,
            }
        };

        let Some(input) = input else {
            debug!(identity, "input for non-running session ignored");
            return;
        };
        match input.try_send(text) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(identity, "worker is not reading stdin, input dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(identity, "worker stdin closed, input dropped");
            }
        }
    }

    /// Fan out one console line from a running session's process.
    pub async fn on_console_line(&self, identity: &str, line: String) {
        let state = self.state.lock().await;
        match state.sessions.get(identity) {
            Some(session) if session.state == SessionState::Running => {
                session.console(identity, line);
            }
            _ => debug!(identity, "console line for non-running session dropped"),
        }
    }

    /// Handle worker process exit: `Running -> Closed`, fan out, remove.
    pub async fn on_process_exit(&self, identity: &str, status: Option<ExitStatus>) {
        info!(identity, status = %describe_exit(status), "worker process exited");
        let mut state = self.state.lock().await;
        self.finish(&mut state, identity, SessionState::Closed, None);
    }

    /// Read a session's log file as non-blank lines.
    ///
    /// Works for active sessions with a known log location and for removed
    /// sessions still in the retention window.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LogUnavailable` if no log location is known or the
    /// file cannot be read.
    pub async fn read_log(&self, identity: &str) -> Result<Vec<String>> {
        let path = self
            .state
            .lock()
            .await
            .log_location(identity)
            .ok_or_else(|| AppError::LogUnavailable(format!("no log for session {identity}")))?;

        let bytes = tokio::fs::read(&path).await.map_err(|err| {
            AppError::LogUnavailable(format!("failed to read {}: {err}", path.display()))
        })?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(console_lines(&text).map(str::to_owned).collect())
    }

    /// Attach an observer to a session. Unknown identities are a no-op.
    pub async fn subscribe(&self, identity: &str, observer: Observer) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.get_mut(identity) {
            session.subscribers.insert(observer);
        }
    }

    /// Detach an observer from a session. Unknown identities are a no-op.
    pub async fn unsubscribe(&self, identity: &str, client: ClientId) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.get_mut(identity) {
            session.subscribers.remove(client);
        }
    }

    /// Detach a disconnected client from every session.
    pub async fn disconnect(&self, client: ClientId) {
        let mut state = self.state.lock().await;
        let mut removed = 0_usize;
        for session in state.sessions.values_mut() {
            if session.subscribers.remove(client) {
                removed += 1;
            }
        }
        debug!(%client, sessions = removed, "client detached");
    }

    /// Snapshot of all active sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let state = self.state.lock().await;
        let mut sessions: Vec<SessionSummary> = state
            .sessions
            .iter()
            .map(|(identity, session)| session.summary(identity))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Number of active sessions.
    pub async fn active_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Number of sessions that own a worker process.
    pub async fn running_count(&self) -> usize {
        self.state
            .lock()
            .await
            .sessions
            .values()
            .filter(|session| session.process.is_some())
            .count()
    }

    /// Stop all running workers.
    ///
    /// Writes the stop command to every running worker, waits up to `grace`
    /// for them to exit, then terminates whatever is left. Sessions that
    /// never reached `Running` are not waited on.
    pub async fn shutdown(&self, grace: Duration) {
        let inputs: Vec<(String, _)> = {
            let state = self.state.lock().await;
            state
                .sessions
                .iter()
                .filter_map(|(identity, session)| {
                    session
                        .process
                        .as_ref()
                        .map(|process| (identity.clone(), process.input()))
                })
                .collect()
        };

        info!(running = inputs.len(), "stopping running workers");
        for (identity, input) in inputs {
            if input.try_send(self.settings.stop_command.clone()).is_err() {
                debug!(identity, "stop command not queued");
            }
        }

        if self.wait_drained(grace).await {
            info!("all workers stopped");
            return;
        }

        {
            let state = self.state.lock().await;
            for (identity, session) in &state.sessions {
                if let Some(process) = &session.process {
                    warn!(identity, "worker did not stop in time, terminating");
                    process.terminate();
                }
            }
        }

        if !self.wait_drained(TERMINATION_DRAIN).await {
            warn!(
                remaining = self.running_count().await,
                "workers still running at shutdown"
            );
        }
    }

    async fn wait_drained(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            loop {
                let notified = self.drained.notified();
                if self.running_count().await == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

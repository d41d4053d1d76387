//! Worker driver abstraction.
//!
//! The [`WorkerDriver`] trait is the only thing the orchestrator knows
//! about a worker type: how to acquire its artifact and how to start a
//! process from it. Everything type-specific (download sources, patch
//! steps, command lines, directory layout) stays behind this seam.

pub mod artifact;
pub mod paper;
pub mod spigot;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::process::Child;

use crate::config::GlobalConfig;
use crate::models::session::SessionConfig;
use crate::{AppError, Result};

/// A freshly spawned worker process.
///
/// The child must have piped `stdin`, `stdout` and `stderr`.
#[derive(Debug)]
pub struct LaunchedWorker {
    /// Spawned process with piped stdio.
    pub child: Child,
    /// File the worker writes its console log to.
    pub log_file: PathBuf,
}

/// Type-specific acquisition and launch procedures.
pub trait WorkerDriver: Send + Sync {
    /// Worker type name matched against creation requests.
    fn kind(&self) -> &str;

    /// Fetch and prepare the artifact for `config`.
    ///
    /// Must skip redundant downloads when the cached artifact is current.
    /// Runs on the acquisition queue, never concurrently with another
    /// acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acquisition`] when a fetch or patch step fails.
    fn acquire<'a>(
        &'a self,
        config: &'a SessionConfig,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Start the worker process once acquisition has succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Launch`] when the process cannot be spawned.
    fn launch<'a>(
        &'a self,
        config: &'a SessionConfig,
    ) -> Pin<Box<dyn Future<Output = Result<LaunchedWorker>> + Send + 'a>>;
}

/// Registered drivers keyed by worker type.
#[derive(Clone, Default)]
pub struct DriverSet {
    drivers: HashMap<String, Arc<dyn WorkerDriver>>,
}

impl DriverSet {
    /// Create an empty driver set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drivers for the built-in worker types (`paper`, `spigot`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn builtin(config: &GlobalConfig) -> Result<Self> {
        let http = artifact::http_client()?;
        let mut set = Self::new();
        set.register(Arc::new(paper::PaperDriver::new(config, http.clone())));
        set.register(Arc::new(spigot::SpigotDriver::new(config, http)));
        Ok(set)
    }

    /// Register a driver, replacing any existing driver of the same type.
    pub fn register(&mut self, driver: Arc<dyn WorkerDriver>) {
        self.drivers.insert(driver.kind().to_owned(), driver);
    }

    /// Look up the driver for `kind`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownWorkerType` when no driver is registered.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn WorkerDriver>> {
        self.drivers
            .get(kind)
            .cloned()
            .ok_or_else(|| AppError::UnknownWorkerType(kind.to_owned()))
    }

    /// Registered worker type names.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.drivers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for DriverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverSet")
            .field("kinds", &self.kinds())
            .finish()
    }
}

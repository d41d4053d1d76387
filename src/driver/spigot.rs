//! Spigot worker driver.
//!
//! Spigot jars are built locally by `BuildTools.jar`. Acquisition refreshes
//! the tool by its freshness marker, then builds `spigot-<version>.jar` only
//! if it is not already in the jar cache. The tool's scratch directory and
//! the by-product craftbukkit jar are removed after every build attempt.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tracing::{info, warn};

use super::artifact::{self, ServerLayout};
use super::{LaunchedWorker, WorkerDriver};
use crate::config::GlobalConfig;
use crate::models::session::SessionConfig;
use crate::Result;

/// Driver for the `spigot` worker type.
#[derive(Debug, Clone)]
pub struct SpigotDriver {
    http: reqwest::Client,
    build_tools_url: String,
    java: String,
    jvm_flags: Vec<String>,
    jars_dir: PathBuf,
    tools_dir: PathBuf,
    servers_dir: PathBuf,
}

impl SpigotDriver {
    /// Build the driver from global configuration.
    #[must_use]
    pub fn new(config: &GlobalConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            build_tools_url: config.spigot.build_tools_url.clone(),
            java: config.java_binary.clone(),
            jvm_flags: config.jvm_flags.clone(),
            jars_dir: config.jars_dir(),
            tools_dir: config.tools_dir(),
            servers_dir: config.servers_dir(),
        }
    }

    fn jar(&self, version: &str) -> PathBuf {
        self.jars_dir.join(format!("spigot-{version}.jar"))
    }

    async fn refresh_build_tools(&self) -> Result<PathBuf> {
        let tool = self.tools_dir.join("BuildTools.jar");
        let marker = self.tools_dir.join("BuildTools.log");

        match artifact::fetch_if_stale(&self.http, &self.build_tools_url, &tool, &marker).await? {
            Some(stamp) => artifact::write_marker(&marker, &stamp).await?,
            None => info!("latest BuildTools already present"),
        }
        Ok(tool)
    }

    async fn prepare(&self, config: &SessionConfig) -> Result<()> {
        let version = config.version.as_str();
        artifact::ensure_dir(&self.jars_dir).await?;
        artifact::ensure_dir(&self.tools_dir).await?;

        let tool = self.refresh_build_tools().await?;

        let jar = self.jar(version);
        if jar.exists() {
            info!(version, "spigot already built");
            return Ok(());
        }

        let scratch = self.tools_dir.join("cache");
        artifact::ensure_dir(&scratch).await?;

        info!(version, "building spigot");
        let mut args = artifact::heap_flags(config.memory).to_vec();
        args.extend([
            "-jar".to_owned(),
            tool.to_string_lossy().into_owned(),
            "--rev".to_owned(),
            version.to_owned(),
            "--output-dir".to_owned(),
            self.jars_dir.to_string_lossy().into_owned(),
        ]);
        let built = artifact::run_java_step(&self.java, &args, &scratch).await;

        if built.is_err() {
            if let Err(err) = artifact::remove_if_exists(&jar).await {
                warn!(%err, "failed to remove partial spigot jar");
            }
        }
        if let Err(err) = tokio::fs::remove_dir_all(&scratch).await {
            warn!(%err, dir = %scratch.display(), "failed to remove BuildTools scratch dir");
        }
        if let Err(err) = artifact::remove_if_exists(
            &self.jars_dir.join(format!("craftbukkit-{version}.jar")),
        )
        .await
        {
            warn!(%err, "failed to remove craftbukkit jar");
        }

        built
    }

    async fn start(&self, config: &SessionConfig) -> Result<LaunchedWorker> {
        let version = config.version.as_str();
        let layout = ServerLayout::new(&self.servers_dir, "spigot", version, &config.name);
        layout.create().await?;

        let cmd = artifact::launch_command(
            &self.java,
            &self.jvm_flags,
            &self.jar(version),
            config.memory,
            config.port,
            &layout,
        );
        let child = artifact::spawn(cmd)?;

        Ok(LaunchedWorker {
            child,
            log_file: layout.log_file(),
        })
    }
}

impl WorkerDriver for SpigotDriver {
    fn kind(&self) -> &str {
        "spigot"
    }

    fn acquire<'a>(
        &'a self,
        config: &'a SessionConfig,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.prepare(config))
    }

    fn launch<'a>(
        &'a self,
        config: &'a SessionConfig,
    ) -> Pin<Box<dyn Future<Output = Result<LaunchedWorker>> + Send + 'a>> {
        Box::pin(self.start(config))
    }
}

//! Paper worker driver.
//!
//! Acquisition downloads the paperclip jar for a version, runs it once in
//! patch-only mode to produce `cache/patched_<version>.jar`, and drops the
//! vanilla jar paperclip leaves behind. Launch copies the patched jar into
//! the instance's own cache so paperclip skips re-patching on startup.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tracing::info;

use super::artifact::{self, ServerLayout};
use super::{LaunchedWorker, WorkerDriver};
use crate::config::GlobalConfig;
use crate::models::session::SessionConfig;
use crate::{AppError, Result};

/// Driver for the `paper` worker type.
#[derive(Debug, Clone)]
pub struct PaperDriver {
    http: reqwest::Client,
    download_url: String,
    java: String,
    jvm_flags: Vec<String>,
    jars_dir: PathBuf,
    servers_dir: PathBuf,
}

impl PaperDriver {
    /// Build the driver from global configuration.
    #[must_use]
    pub fn new(config: &GlobalConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            download_url: config.paper.download_url.clone(),
            java: config.java_binary.clone(),
            jvm_flags: config.jvm_flags.clone(),
            jars_dir: config.jars_dir(),
            servers_dir: config.servers_dir(),
        }
    }

    fn jar(&self, version: &str) -> PathBuf {
        self.jars_dir.join(format!("paper_{version}.jar"))
    }

    fn patched_jar(&self, version: &str) -> PathBuf {
        self.jars_dir
            .join("cache")
            .join(format!("patched_{version}.jar"))
    }

    async fn prepare(&self, config: &SessionConfig) -> Result<()> {
        let version = config.version.as_str();
        let url = self.download_url.replace("{version}", version);
        let jar = self.jar(version);
        let marker = self.jars_dir.join(format!("paper_{version}.log"));

        artifact::ensure_dir(&self.jars_dir.join("cache")).await?;

        let Some(stamp) = artifact::fetch_if_stale(&self.http, &url, &jar, &marker).await? else {
            info!(version, "latest paper already present");
            return Ok(());
        };

        info!(version, "patching paper");
        let mut args = artifact::heap_flags(config.memory).to_vec();
        args.push("-Dpaperclip.patchonly=true".into());
        args.push("-jar".into());
        args.push(jar.to_string_lossy().into_owned());
        artifact::run_java_step(&self.java, &args, &self.jars_dir).await?;

        artifact::remove_if_exists(
            &self
                .jars_dir
                .join("cache")
                .join(format!("mojang_{version}.jar")),
        )
        .await?;

        artifact::write_marker(&marker, &stamp).await
    }

    async fn start(&self, config: &SessionConfig) -> Result<LaunchedWorker> {
        let version = config.version.as_str();
        let layout = ServerLayout::new(&self.servers_dir, "paper", version, &config.name);
        layout.create().await?;

        let instance_cache = layout.configurations.join("cache");
        artifact::ensure_dir(&instance_cache).await?;
        let patched = self.patched_jar(version);
        tokio::fs::copy(&patched, instance_cache.join(format!("patched_{version}.jar")))
            .await
            .map_err(|err| {
                AppError::Launch(format!("failed to copy {}: {err}", patched.display()))
            })?;

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

impl WorkerDriver for PaperDriver {
    fn kind(&self) -> &str {
        "paper"
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

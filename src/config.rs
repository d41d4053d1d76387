//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Paper artifact source.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PaperConfig {
    /// Download URL template; `{version}` is substituted.
    #[serde(default = "default_paper_url")]
    pub download_url: String,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            download_url: default_paper_url(),
        }
    }
}

/// Spigot `BuildTools` source.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SpigotConfig {
    /// URL of the latest `BuildTools.jar`.
    #[serde(default = "default_build_tools_url")]
    pub build_tools_url: String,
}

impl Default for SpigotConfig {
    fn default() -> Self {
        Self {
            build_tools_url: default_build_tools_url(),
        }
    }
}

fn default_paper_url() -> String {
    "https://papermc.io/api/v1/paper/{version}/latest/download".into()
}

fn default_build_tools_url() -> String {
    "https://hub.spigotmc.org/jenkins/job/BuildTools/lastSuccessfulBuild/artifact/target/BuildTools.jar"
        .into()
}

fn default_listen_address() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_java_binary() -> String {
    "java".into()
}

fn default_jvm_flags() -> Vec<String> {
    [
        "-XX:+UseG1GC",
        "-XX:+ParallelRefProcEnabled",
        "-XX:MaxGCPauseMillis=200",
        "-XX:+UnlockExperimentalVMOptions",
        "-XX:+DisableExplicitGC",
        "-XX:+AlwaysPreTouch",
        "-XX:G1NewSizePercent=30",
        "-XX:G1MaxNewSizePercent=40",
        "-XX:G1HeapRegionSize=8M",
        "-XX:G1ReservePercent=20",
        "-XX:G1HeapWastePercent=5",
        "-XX:G1MixedGCCountTarget=4",
        "-XX:InitiatingHeapOccupancyPercent=15",
        "-XX:G1MixedGCLiveThresholdPercent=90",
        "-XX:G1RSetUpdatingPauseTimePercent=5",
        "-XX:SurvivorRatio=32",
        "-XX:+PerfDisableSharedMem",
        "-XX:MaxTenuringThreshold=1",
        "-Dfile.encoding=UTF-8",
        "-Dcom.mojang.eula.agree=true",
        "-Dusing.aikars.flags=https://mcflags.emc.gs",
        "-Daikars.new.flags=true",
    ]
    .iter()
    .map(|flag| (*flag).to_owned())
    .collect()
}

fn default_identity_length() -> usize {
    6
}

fn default_client_buffer() -> usize {
    256
}

fn default_startup_timeout() -> u64 {
    120
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_stop_command() -> String {
    "stop".into()
}

fn default_retained_logs() -> usize {
    64
}

/// Global configuration parsed from `craftplane.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Bind address for the control channel.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Control-plane listening port; never handed out to a worker.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root of the artifact cache and per-server directories.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
    /// Java executable used for patch steps and launches.
    #[serde(default = "default_java_binary")]
    pub java_binary: String,
    /// JVM flags inserted between the heap flags and `-jar`.
    #[serde(default = "default_jvm_flags")]
    pub jvm_flags: Vec<String>,
    /// Hex characters kept from the identity hash.
    #[serde(default = "default_identity_length")]
    pub identity_length: usize,
    /// Per-observer event buffer.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
    /// Upper bound on a driver's launch step.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u64,
    /// Time running workers get to exit on their own at shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// Console command written to running workers at shutdown.
    #[serde(default = "default_stop_command")]
    pub stop_command: String,
    /// Removed sessions whose log location stays readable.
    #[serde(default = "default_retained_logs")]
    pub retained_logs: usize,
    /// Paper driver settings.
    #[serde(default)]
    pub paper: PaperConfig,
    /// Spigot driver settings.
    #[serde(default)]
    pub spigot: SpigotConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
            build_dir: default_build_dir(),
            java_binary: default_java_binary(),
            jvm_flags: default_jvm_flags(),
            identity_length: default_identity_length(),
            client_buffer: default_client_buffer(),
            startup_timeout_seconds: default_startup_timeout(),
            shutdown_grace_seconds: default_shutdown_grace(),
            stop_command: default_stop_command(),
            retained_logs: default_retained_logs(),
            paper: PaperConfig::default(),
            spigot: SpigotConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Directory holding downloaded and patched server jars.
    #[must_use]
    pub fn jars_dir(&self) -> PathBuf {
        self.build_dir.join("jars")
    }

    /// Directory holding build tooling (`BuildTools.jar`).
    #[must_use]
    pub fn tools_dir(&self) -> PathBuf {
        self.build_dir.join("tools")
    }

    /// Directory holding one subdirectory per server instance.
    #[must_use]
    pub fn servers_dir(&self) -> PathBuf {
        self.build_dir.join("servers")
    }

    /// Launch timeout as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    /// Shutdown grace period as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    fn validate(&self) -> Result<()> {
        if !(4..=64).contains(&self.identity_length) {
            return Err(AppError::Config(
                "identity_length must be between 4 and 64".into(),
            ));
        }

        if self.client_buffer == 0 {
            return Err(AppError::Config(
                "client_buffer must be greater than zero".into(),
            ));
        }

        if self.startup_timeout_seconds == 0 {
            return Err(AppError::Config(
                "startup_timeout_seconds must be greater than zero".into(),
            ));
        }

        if !self.paper.download_url.contains("{version}") {
            return Err(AppError::Config(
                "paper.download_url must contain a {version} placeholder".into(),
            ));
        }

        Ok(())
    }
}

//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Requested identity or port is already held by an active session.
    DuplicateConfiguration(String),
    /// No worker driver is registered for the requested type.
    UnknownWorkerType(String),
    /// Requested name or version cannot be used as a path component.
    InvalidConfiguration(String),
    /// Artifact fetch or patch step failed.
    Acquisition(String),
    /// Worker process failed to start.
    Launch(String),
    /// Session log could not be located or read.
    LogUnavailable(String),
    /// Lifecycle event arrived for a state that does not accept it.
    InvalidTransition(String),
    /// Malformed control-channel message.
    Protocol(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Reason string reported to the requesting client over the control channel.
    #[must_use]
    pub fn client_reason(&self) -> String {
        match self {
            Self::DuplicateConfiguration(_) => "Duplicate configuration".to_owned(),
            Self::UnknownWorkerType(kind) => format!("Unknown {kind}"),
            Self::InvalidConfiguration(_) => "Invalid configuration".to_owned(),
            Self::LogUnavailable(_) => "Unable to open log".to_owned(),
            Self::Protocol(msg) => format!("Invalid message: {msg}"),
            other => other.to_string(),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::DuplicateConfiguration(msg) => write!(f, "duplicate configuration: {msg}"),
            Self::UnknownWorkerType(msg) => write!(f, "unknown worker type: {msg}"),
            Self::InvalidConfiguration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Acquisition(msg) => write!(f, "acquisition: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::LogUnavailable(msg) => write!(f, "log unavailable: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Acquisition(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Defining configuration of a requested worker instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Operator-chosen server name.
    pub name: String,
    /// Artifact version (e.g. `1.20`).
    pub version: String,
    /// Network port the worker listens on.
    pub port: u16,
    /// Heap size in megabytes.
    pub memory: u32,
    /// Worker type, matched against the registered drivers.
    #[serde(rename = "type")]
    pub kind: String,
}

impl SessionConfig {
    /// Short human-readable label for log lines.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {} ({})", self.kind, self.version, self.name)
    }

    /// Check the fields that become path components under the build dir.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfiguration` if `name` or `version` is
    /// empty or contains a path separator, `..`, or a control character.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("name", &self.name), ("version", &self.version)] {
            if let Some(problem) = path_component_problem(value) {
                return Err(AppError::InvalidConfiguration(format!(
                    "{field} {value:?} {problem}"
                )));
            }
        }
        Ok(())
    }
}

fn path_component_problem(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        Some("is empty")
    } else if value.contains(&['/', '\\'][..]) {
        Some("contains a path separator")
    } else if value.contains("..") {
        Some("contains '..'")
    } else if value.chars().any(char::is_control) {
        Some("contains a control character")
    } else {
        None
    }
}

/// Lifecycle status for a managed worker session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Admitted; acquisition task queued.
    Pending,
    /// Acquisition task is executing.
    Acquiring,
    /// Artifact ready; driver launch in progress.
    Starting,
    /// Process launched and owned by the session.
    Running,
    /// Process exited.
    Closed,
    /// Acquisition or launch failed.
    Failed,
}

impl SessionState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Acquiring)
                | (Self::Acquiring, Self::Starting | Self::Failed)
                | (Self::Starting, Self::Running | Self::Failed)
                | (Self::Running, Self::Closed)
        )
    }

    /// Lower-case name used in logs and listings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acquiring => "acquiring",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// Read-only snapshot of an active session for listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSummary {
    /// Derived session identity.
    pub identity: String,
    /// Server name.
    pub name: String,
    /// Artifact version.
    pub version: String,
    /// Worker port.
    pub port: u16,
    /// Worker type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Admission timestamp.
    pub created_at: DateTime<Utc>,
}

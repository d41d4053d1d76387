//! Control-channel message types.
//!
//! Every frame is one JSON object `{"event": "<name>", "data": {...}}`.
//!
//! ## Client → server
//! ```json
//! {"event": "create", "data": {"name": "Alpha", "version": "1.20", "port": 25565, "memory": 2048, "type": "paper"}}
//! {"event": "subscribe", "data": {"identity": "3fa2c1"}}
//! {"event": "unsubscribe", "data": {"identity": "3fa2c1"}}
//! {"event": "send", "data": {"identity": "3fa2c1", "message": "say hi"}}
//! {"event": "log", "data": {"identity": "3fa2c1"}}
//! {"event": "list", "data": {}}
//! ```
//!
//! ## Server → client
//! ```json
//! {"event": "init", "data": {"identity": "3fa2c1"}}
//! {"event": "console", "data": {"identity": "3fa2c1", "message": "Done (3.2s)!"}}
//! {"event": "close", "data": {"identity": "3fa2c1"}}
//! {"event": "fail", "data": {"identity": "3fa2c1"}}
//! {"event": "err", "data": {"reason": "Duplicate configuration"}}
//! {"event": "sessions", "data": {"sessions": [...]}}
//! ```

use std::fmt::Display;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::event::SessionEvent;
use crate::models::session::{SessionConfig, SessionSummary};
use crate::{AppError, Result};

/// Session creation parameters as sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Server name.
    pub name: String,
    /// Artifact version.
    pub version: String,
    /// Worker port.
    #[serde(deserialize_with = "number_or_string")]
    pub port: u16,
    /// Heap size in megabytes.
    #[serde(deserialize_with = "number_or_string")]
    pub memory: u32,
    /// Worker type.
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<CreateRequest> for SessionConfig {
    fn from(req: CreateRequest) -> Self {
        Self {
            name: req.name,
            version: req.version,
            port: req.port,
            memory: req.memory,
            kind: req.kind,
        }
    }
}

/// Payload naming one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRef {
    /// Session identity.
    #[serde(alias = "hash")]
    pub identity: String,
}

/// Console input for a running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Session identity.
    #[serde(alias = "hash")]
    pub identity: String,
    /// Line written to the worker's stdin.
    pub message: String,
}

/// Inbound control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request a new session.
    Create(CreateRequest),
    /// Attach to a session's events.
    Subscribe(IdentityRef),
    /// Detach from a session's events.
    Unsubscribe(IdentityRef),
    /// Write a console line to a running session.
    Send(SendRequest),
    /// Replay a session's log file.
    Log(IdentityRef),
    /// List active sessions.
    List {},
}

impl ClientMessage {
    /// Parse one text frame. A missing or `null` `data` reads as `{}`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the frame is not a valid message.
    pub fn parse(text: &str) -> Result<Self> {
        let mut value: serde_json::Value =
            serde_json::from_str(text).map_err(|err| AppError::Protocol(err.to_string()))?;

        if let Some(envelope) = value.as_object_mut() {
            let data = envelope
                .entry("data")
                .or_insert(serde_json::Value::Null);
            if data.is_null() {
                *data = serde_json::Value::Object(serde_json::Map::new());
            }
        }

        serde_json::from_value(value).map_err(|err| AppError::Protocol(err.to_string()))
    }
}

/// Outbound control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session admitted.
    Init {
        /// Session identity.
        identity: String,
    },
    /// One console line.
    Console {
        /// Session identity.
        identity: String,
        /// Line content.
        message: String,
    },
    /// Worker process exited.
    Close {
        /// Session identity.
        identity: String,
    },
    /// Acquisition or launch failed.
    Fail {
        /// Session identity.
        identity: String,
    },
    /// Request rejected; sent to the requester only.
    #[serde(rename = "err")]
    Error {
        /// Client-facing reason.
        reason: String,
    },
    /// Reply to `list`.
    Sessions {
        /// Active sessions, oldest first.
        sessions: Vec<SessionSummary>,
    },
}

impl ServerMessage {
    /// Error reply carrying the client-facing reason for `err`.
    #[must_use]
    pub fn rejection(err: &AppError) -> Self {
        Self::Error {
            reason: err.client_reason(),
        }
    }

    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| AppError::Protocol(err.to_string()))
    }

    /// Whether this message ends a session's event stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Close { .. } | Self::Fail { .. })
    }
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Initialized { identity } => Self::Init { identity },
            SessionEvent::ConsoleLine { identity, message } => Self::Console { identity, message },
            SessionEvent::Closed { identity } => Self::Close { identity },
            SessionEvent::Failed { identity } => Self::Fail { identity },
        }
    }
}

/// Accept a JSON number or a numeric string.
fn number_or_string<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + TryFrom<u64>,
    <T as FromStr>::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => T::try_from(n).map_err(|_| D::Error::custom(format!("{n} is out of range"))),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|err| D::Error::custom(format!("invalid number {text:?}: {err}"))),
    }
}

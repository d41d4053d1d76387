//! Lifecycle and console events delivered to session subscribers.

/// Event fanned out to every subscriber of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session admitted; sent to the creator.
    Initialized {
        /// Session identity.
        identity: String,
    },
    /// One non-blank line of worker console output.
    ConsoleLine {
        /// Session identity.
        identity: String,
        /// Line content without terminator.
        message: String,
    },
    /// Worker process exited.
    Closed {
        /// Session identity.
        identity: String,
    },
    /// Acquisition or launch failed.
    Failed {
        /// Session identity.
        identity: String,
    },
}

impl SessionEvent {
    /// Identity of the session that emitted this event.
    #[must_use]
    pub fn identity(&self) -> &str {
        match self {
            Self::Initialized { identity }
            | Self::ConsoleLine { identity, .. }
            | Self::Closed { identity }
            | Self::Failed { identity } => identity,
        }
    }

    /// Whether this event ends the session's event stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed { .. })
    }
}

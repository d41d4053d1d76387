//! Event fan-out to session subscribers.
//!
//! Each connected client is an [`Observer`]: an id plus a bounded event
//! channel drained by the client's connection task. Delivery uses
//! `try_send`, so a slow or vanished client loses console lines instead of
//! stalling the emitting session or other subscribers. Terminal events are
//! never dropped for a full buffer: they are handed to a task that waits
//! for room.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::event::SessionEvent;

/// Unique connected-client identifier.
pub type ClientId = Uuid;

/// A client that can be attached to session subscriber sets.
#[derive(Debug, Clone)]
pub struct Observer {
    id: ClientId,
    tx: mpsc::Sender<SessionEvent>,
}

impl Observer {
    /// Create an observer with a fresh id and a channel of `capacity` events.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    /// Observer id.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Non-blocking delivery of one event.
    ///
    /// Returns `false` if the event was dropped. A terminal event that finds
    /// the buffer full is queued behind it on a separate task.
    pub fn deliver(&self, event: SessionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) if event.is_terminal() => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    warn!(
                        client = %self.id,
                        identity = event.identity(),
                        "no runtime, terminal event dropped"
                    );
                    return false;
                };
                debug!(
                    client = %self.id,
                    identity = event.identity(),
                    "observer buffer full, deferring terminal event"
                );
                let tx = self.tx.clone();
                runtime.spawn(async move {
                    let _ = tx.send(event).await;
                });
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    client = %self.id,
                    identity = event.identity(),
                    "observer buffer full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(client = %self.id, "observer channel closed");
                false
            }
        }
    }
}

/// Observers attached to one session.
#[derive(Debug, Default)]
pub struct SubscriberSet {
    observers: HashMap<ClientId, Observer>,
}

impl SubscriberSet {
    /// Attach an observer. Re-subscribing is a no-op.
    pub fn insert(&mut self, observer: Observer) {
        self.observers.entry(observer.id).or_insert(observer);
    }

    /// Detach an observer. Unknown ids are a no-op.
    pub fn remove(&mut self, id: ClientId) -> bool {
        self.observers.remove(&id).is_some()
    }

    /// Whether the observer is attached.
    #[must_use]
    pub fn contains(&self, id: ClientId) -> bool {
        self.observers.contains_key(&id)
    }

    /// Number of attached observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observer is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `event` to every attached observer.
    ///
    /// Returns the number of observers that accepted the event.
    pub fn broadcast(&self, event: &SessionEvent) -> usize {
        self.observers
            .values()
            .filter(|observer| observer.deliver(event.clone()))
            .count()
    }
}

/// Whether a console line carries no visible content.
#[must_use]
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Split raw console text on `\r\n` / `\n` and drop blank lines.
pub fn console_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !is_blank(line))
}

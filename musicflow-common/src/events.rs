//! Event types for the MusicFlow event system
//!
//! Provides shared event definitions and the EventBus used to broadcast task
//! lifecycle changes to whatever front end is attached. Emission is
//! fire-and-forget: a registry must never block or fail because nobody is
//! listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// MusicFlow event types
///
/// Events are broadcast via [`EventBus`] and can be serialized for
/// transmission to a UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    /// A generation or update task was accepted by the registry
    TaskSubmitted {
        task_id: String,
        track_name: String,
        is_update: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A worker began executing the task
    TaskStarted {
        task_id: String,
        track_name: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The task completed and its track was stored
    TaskCompleted {
        task_id: String,
        track_name: String,
        note_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The generation collaborator failed
    TaskFailed {
        task_id: String,
        track_name: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The task was cancelled before reaching a terminal state on its own
    TaskCancelled {
        task_id: String,
        track_name: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus for [`FlowEvent`]
///
/// Thin wrapper over `tokio::sync::broadcast`: subscribers receive events
/// emitted after they subscribe; slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: FlowEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<FlowEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring whether anyone is listening
    pub fn emit_lossy(&self, event: FlowEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

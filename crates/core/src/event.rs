//! Domain event system — pipeline progress published for observers.
//!
//! The pipeline never waits on subscribers; with nobody listening, events
//! are dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Stage;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A pipeline stage finished successfully
    StageCompleted {
        stage: Stage,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline stage failed and aborted the request
    StageFailed {
        stage: Stage,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A turn was appended to history
    TurnPersisted {
        scope: String,
        timestamp: DateTime<Utc>,
    },

    /// The turn could not be stored; the reply was still returned
    PersistenceFailed {
        scope: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Synthesis failed and the reply was returned without audio
    SynthesisDegraded {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

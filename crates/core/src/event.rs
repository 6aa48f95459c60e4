//! Domain event system: observers of runs without coupling to the loop.
//!
//! The orchestrator publishes an event on every state transition, model
//! call and executed action. Subscribers (the CLI, tests) filter for what
//! they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::run::{RunPhase, RunStatus};

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A task was accepted and its run started
    RunStarted {
        task_id: String,
        repository: String,
        timestamp: DateTime<Utc>,
    },

    /// The state machine moved between phases
    PhaseChanged {
        task_id: String,
        turn: u32,
        from: RunPhase,
        to: RunPhase,
        timestamp: DateTime<Utc>,
    },

    /// A model call returned
    ModelCalled {
        task_id: String,
        turn: u32,
        model: String,
        prompt_tokens: usize,
        context_blocks: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An action was executed or found already applied
    ActionExecuted {
        task_id: String,
        turn: u32,
        action: String,
        noop: bool,
        timestamp: DateTime<Utc>,
    },

    /// The run reached a terminal state
    RunFinished {
        task_id: String,
        status: RunStatus,
        turns: u32,
        reason: Option<String>,
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

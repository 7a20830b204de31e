use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent_engine::state::Action;

/// Observable turn-loop events for dashboard-style subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    TurnCompleted {
        turn: u64,
        seq: u64,
        actions: Vec<Action>,
        malformed: Vec<String>,
        executed: Vec<String>,
        story: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    TurnAbandoned {
        turn: u64,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    Paused {
        reason: String,
    },
    Resumed,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TurnEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget; having no subscribers is not an error.
    pub fn send(&self, event: TurnEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

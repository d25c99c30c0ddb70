//! In-process agent event bus.
//!
//! Subagent lifecycle transitions and transcript appends are broadcast to
//! any interested listener (dispatcher, channel workers, tests). Publishing
//! never blocks and never fails; with no receivers the event is dropped.

use tokio::sync::broadcast;
use tracing::debug;

use crate::subagents::SubagentOutcome;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Events published by the orchestration core.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    SubagentSpawned {
        run_id: String,
        requester_session_key: String,
        child_session_key: String,
        task: String,
        at_ms: u64,
    },
    SubagentCompleted {
        run_id: String,
        requester_session_key: String,
        outcome: SubagentOutcome,
        at_ms: u64,
    },
    SessionTranscriptUpdate {
        session_key: String,
        path: String,
    },
}

/// Broadcast bus for [`AgentEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped silently when nobody listens.
    pub fn publish(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            debug!("No receivers for agent event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(AgentEvent::SessionTranscriptUpdate {
            session_key: "s1".into(),
            path: "/tmp/t.jsonl".into(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, AgentEvent::SessionTranscriptUpdate { session_key, .. } if session_key == "s1"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(AgentEvent::SessionTranscriptUpdate {
            session_key: "s1".into(),
            path: String::new(),
        });
    }
}

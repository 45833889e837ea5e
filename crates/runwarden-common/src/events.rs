//! In-process publish/subscribe channel for lifecycle events.
//!
//! Producers (executor, alert engine, notification actions) publish
//! [`SystemEvent`]s without knowing who listens; consumers subscribe and
//! receive every event published after they subscribed. Slow consumers
//! lose the oldest events rather than blocking producers.

use crate::types::{Alert, ExecutionStatus, Severity, StepStatus, TriggerSource};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    ExecutionStarted {
        execution_id: String,
        runbook_id: String,
        source: TriggerSource,
    },
    StepFinished {
        execution_id: String,
        step_id: String,
        status: StepStatus,
        attempts: u32,
    },
    ExecutionFinished {
        execution_id: String,
        runbook_id: String,
        status: ExecutionStatus,
    },
    AlertFired {
        alert: Alert,
    },
    AlertAcknowledged {
        alert_id: String,
        rule_id: String,
    },
    AlertResolved {
        alert_id: String,
        rule_id: String,
    },
    Notification {
        title: String,
        message: String,
        severity: Severity,
        rule_id: String,
        alert_id: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event, returning how many subscribers received it.
    pub fn publish(&self, event: SystemEvent) -> usize {
        // No subscribers is not an error for a producer.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

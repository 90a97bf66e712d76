//! Domain events for downstream delivery (email, SMS, chat).
//!
//! The orchestrator only emits; delivery belongs to whoever implements
//! [`Notifier`].

use crate::record::TriggerSource;
use crate::run::{RunId, StepFailure};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    RunCompleted {
        run_id: RunId,
        workflow: String,
        trigger_source: TriggerSource,
        output: serde_json::Value,
    },
    RunFailed {
        run_id: RunId,
        workflow: String,
        trigger_source: TriggerSource,
        failure: StepFailure,
    },
    /// Raised only under the `escalate` optional-failure policy.
    OptionalStepFailed {
        run_id: RunId,
        workflow: String,
        failure: StepFailure,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: DomainEvent);
}

#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: DomainEvent) {}
}

/// Forwards domain events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<DomainEvent>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<DomainEvent>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: DomainEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::debug!("Dropping domain event, receiver closed: {:?}", e.0);
        }
    }
}

use crate::record::{ErrorKind, ExecutionId, ExecutionStatus};
use crate::run::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while runs and skill executions progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: RunId,
        workflow: String,
        timestamp: DateTime<Utc>,
    },
    RunPaused {
        run_id: RunId,
        step_key: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    RunFailed {
        run_id: RunId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        run_id: RunId,
        step_key: String,
        skill_id: String,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        run_id: RunId,
        step_key: String,
        execution_id: ExecutionId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        run_id: RunId,
        step_key: String,
        required: bool,
        error: String,
        timestamp: DateTime<Utc>,
    },
    AttemptFinished {
        execution_id: ExecutionId,
        skill_id: String,
        attempt: u32,
        status: ExecutionStatus,
        error_kind: Option<ErrorKind>,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    Skill {
        execution_id: ExecutionId,
        skill_id: String,
        event: SkillEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Messages a skill handler reports while it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum SkillEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter handed to skill handlers
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    skill_id: String,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        skill_id: impl Into<String>,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            skill_id: skill_id.into(),
            sender,
        }
    }

    pub fn emit(&self, event: SkillEvent) {
        let _ = self.sender.send(ExecutionEvent::Skill {
            execution_id: self.execution_id,
            skill_id: self.skill_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(SkillEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(SkillEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(SkillEvent::Progress { percent, message });
    }
}

/// In-process broadcast bus for execution events.
///
/// Sends never block; slow subscribers lag and lose the oldest events.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, skill_id: &str) -> EventEmitter {
        EventEmitter::new(execution_id, skill_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

use crate::error::{RunError, SkillError};
use crate::run::RunId;
use crate::skill::ResourceUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle of a single execution attempt.
///
/// Transitions only move forward: `Pending -> Running -> terminal`, with
/// `Pending` allowed to jump straight to `Failed` (input rejected before the
/// handler ran) or `Cancelled` (cancelled while queued for a permit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Failed) | (Pending, Cancelled) => true,
            (Running, Succeeded) | (Running, Failed) | (Running, Cancelled) | (Running, TimedOut) => {
                true
            }
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            "timed_out" => Ok(ExecutionStatus::TimedOut),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// Error category persisted alongside failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transient,
    Timeout,
    Fatal,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SkillError> for ErrorInfo {
    fn from(err: &SkillError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Origin of the event that started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Webhook,
    Cron,
    Manual,
    Api,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerSource::Webhook => "webhook",
            TriggerSource::Cron => "cron",
            TriggerSource::Manual => "manual",
            TriggerSource::Api => "api",
        };
        f.write_str(s)
    }
}

impl FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(TriggerSource::Webhook),
            "cron" | "schedule" => Ok(TriggerSource::Cron),
            "manual" => Ok(TriggerSource::Manual),
            "api" => Ok(TriggerSource::Api),
            other => Err(format!("unknown trigger source '{}'", other)),
        }
    }
}

/// Audit entry for one attempt at invoking a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub skill_id: String,
    pub status: ExecutionStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<ErrorInfo>,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Set when another attempt followed this one.
    #[serde(default)]
    pub retried: bool,
    pub trigger_source: TriggerSource,
    /// Id of the owning run, if any.
    pub correlation_id: Option<RunId>,
    pub step_index: Option<usize>,
    pub step_key: Option<String>,
    pub usage: Option<ResourceUsage>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl ExecutionRecord {
    pub fn new(
        skill_id: impl Into<String>,
        input: serde_json::Value,
        attempt: u32,
        trigger_source: TriggerSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            skill_id: skill_id.into(),
            status: ExecutionStatus::Pending,
            input,
            output: None,
            error: None,
            attempt,
            retried: false,
            trigger_source,
            correlation_id: None,
            step_index: None,
            step_key: None,
            usage: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn with_correlation(mut self, run_id: Option<RunId>) -> Self {
        self.correlation_id = run_id;
        self
    }

    pub fn with_step(mut self, index: Option<usize>, key: Option<String>) -> Self {
        self.step_index = index;
        self.step_key = key;
        self
    }

    fn advance(&mut self, next: ExecutionStatus) -> Result<(), RunError> {
        if !self.status.can_transition_to(next) {
            return Err(RunError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), RunError> {
        self.advance(ExecutionStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn succeed(
        &mut self,
        output: serde_json::Value,
        usage: Option<ResourceUsage>,
    ) -> Result<(), RunError> {
        self.advance(ExecutionStatus::Succeeded)?;
        self.output = Some(output);
        self.usage = usage;
        self.finish();
        Ok(())
    }

    /// Records a failure; the terminal status follows the error kind.
    pub fn fail(&mut self, err: &SkillError) -> Result<(), RunError> {
        let next = match err {
            SkillError::Timeout { .. } => ExecutionStatus::TimedOut,
            SkillError::Cancelled => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Failed,
        };
        self.advance(next)?;
        self.error = Some(ErrorInfo::from(err));
        self.finish();
        Ok(())
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as u64);
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}

use crate::error::RunError;
use crate::mapper::walk;
use crate::record::{ErrorKind, ExecutionId, TriggerSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type RunId = Uuid;

/// Context key holding the trigger payload.
pub const TRIGGER_KEY: &str = "trigger";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Paused)
                | (Paused, Running)
                | (Paused, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "paused" => Ok(RunStatus::Paused),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// How a step was resolved within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Succeeded,
    /// Optional step failed; the run moved on without its output.
    OptionalFailed,
    /// Required step failed; the run halted here.
    Failed,
    /// Pause step that has been resumed.
    Approved,
}

impl StepState {
    pub fn is_resolved(self) -> bool {
        !matches!(self, StepState::Failed)
    }
}

/// Diagnostic attached to a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step_index: usize,
    pub step_key: String,
    pub skill_id: Option<String>,
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub execution_id: Option<ExecutionId>,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step #{} '{}'", self.step_index, self.step_key)?;
        if let Some(skill_id) = &self.skill_id {
            write!(f, " (skill '{}', attempt {})", skill_id, self.attempt)?;
        }
        write!(f, " failed [{}]: {}", self.kind, self.message)
    }
}

/// Write-once mapping of step outputs, keyed by step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunContext {
    entries: BTreeMap<String, Value>,
}

impl RunContext {
    pub fn new(trigger: Value) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(TRIGGER_KEY.to_string(), trigger);
        Self { entries }
    }

    /// Store `value` under `key`. Keys are never overwritten.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<(), RunError> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(RunError::KeyAlreadyWritten(key));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Resolve a dot path such as `enrich.summary`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let (first, rest) = segments.split_first()?;
        walk(self.entries.get(*first)?, rest)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the context without `keys`.
    pub fn without(&self, keys: &[&str]) -> RunContext {
        RunContext {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| !keys.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}

/// One executing or finished instance of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub workflow: String,
    pub status: RunStatus,
    pub trigger_source: TriggerSource,
    /// Index of the first stage the run has not crossed yet.
    pub cursor: usize,
    pub context: RunContext,
    #[serde(default)]
    pub steps: BTreeMap<String, StepState>,
    /// Final execution record of every resolved skill step, in order.
    #[serde(default)]
    pub executions: Vec<ExecutionId>,
    pub error: Option<StepFailure>,
    /// The failed run this one continues, if any.
    #[serde(default)]
    pub resumed_from: Option<RunId>,
    /// Plan signature of the definition the run was started from; empty for
    /// runs written before plans were recorded.
    #[serde(default)]
    pub plan: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn new(workflow: impl Into<String>, trigger_source: TriggerSource, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow: workflow.into(),
            status: RunStatus::Pending,
            trigger_source,
            cursor: 0,
            context: RunContext::new(payload),
            steps: BTreeMap::new(),
            executions: Vec::new(),
            error: None,
            resumed_from: None,
            plan: String::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }

    /// Start a fresh run that picks up where a failed run stopped.
    ///
    /// The failed run is left untouched. Resolved steps and their outputs
    /// carry over; the step that failed does not.
    pub fn continuation_of(failed: &WorkflowRun) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow: failed.workflow.clone(),
            status: RunStatus::Pending,
            trigger_source: failed.trigger_source,
            cursor: failed.cursor,
            context: failed.context.clone(),
            steps: failed
                .steps
                .iter()
                .filter(|(_, state)| state.is_resolved())
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            executions: Vec::new(),
            error: None,
            resumed_from: Some(failed.id),
            plan: failed.plan.clone(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_resolved(&self, step_key: &str) -> bool {
        self.steps
            .get(step_key)
            .map(|s| s.is_resolved())
            .unwrap_or(false)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_milliseconds().max(0) as u64)
    }

    /// Apply a partial update. Either the whole update applies or none of it.
    pub fn apply(&mut self, update: &RunUpdate) -> Result<(), RunError> {
        if self.is_terminal() {
            return Err(RunError::Terminal(self.id.to_string()));
        }
        if let Some(next) = update.status {
            if next != self.status && !self.status.can_transition_to(next) {
                return Err(RunError::InvalidTransition {
                    from: self.status.to_string(),
                    to: next.to_string(),
                });
            }
        }
        let mut seen = std::collections::HashSet::new();
        for (key, _) in &update.outputs {
            if self.context.contains_key(key) || !seen.insert(key.as_str()) {
                return Err(RunError::KeyAlreadyWritten(key.clone()));
            }
        }
        for (key, state) in &update.steps {
            if let Some(current) = self.steps.get(key) {
                if current.is_resolved() {
                    return Err(RunError::InvalidTransition {
                        from: format!("{}={:?}", key, current),
                        to: format!("{:?}", state),
                    });
                }
            }
        }

        for (key, value) in &update.outputs {
            self.context.insert(key.clone(), value.clone())?;
        }
        for (key, state) in &update.steps {
            self.steps.insert(key.clone(), *state);
        }
        self.executions.extend(update.executions.iter().copied());
        if let Some(cursor) = update.cursor {
            self.cursor = cursor;
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        let now = Utc::now();
        if let Some(next) = update.status {
            self.status = next;
            if next.is_terminal() {
                self.completed_at = Some(now);
            }
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Partial update persisted by the runner as steps resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub cursor: Option<usize>,
    #[serde(default)]
    pub outputs: Vec<(String, Value)>,
    #[serde(default)]
    pub steps: Vec<(String, StepState)>,
    #[serde(default)]
    pub executions: Vec<ExecutionId>,
    pub error: Option<StepFailure>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_cursor(mut self, cursor: usize) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.outputs.push((key.into(), value));
        self
    }

    pub fn with_step(mut self, key: impl Into<String>, state: StepState) -> Self {
        self.steps.push((key.into(), state));
        self
    }

    pub fn with_execution(mut self, id: ExecutionId) -> Self {
        self.executions.push(id);
        self
    }

    pub fn with_error(mut self, error: StepFailure) -> Self {
        self.error = Some(error);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running_run() -> WorkflowRun {
        let mut run = WorkflowRun::new("listing-media", TriggerSource::Webhook, json!({"id": 1}))
            .with_plan("validate;enrich");
        run.apply(&RunUpdate::status(RunStatus::Running)).unwrap();
        run
    }

    #[test]
    fn context_keys_are_write_once() {
        let mut run = running_run();
        run.apply(&RunUpdate::default().with_output("enrich", json!({"v": 1})))
            .unwrap();

        let err = run
            .apply(&RunUpdate::default().with_output("enrich", json!({"v": 2})))
            .unwrap_err();
        assert_eq!(err, RunError::KeyAlreadyWritten("enrich".into()));
        assert_eq!(run.context.lookup("enrich.v"), Some(&json!(1)));

        assert!(run.context.insert(TRIGGER_KEY, json!(null)).is_err());
    }

    #[test]
    fn rejected_update_leaves_run_untouched() {
        let mut run = running_run();
        run.apply(&RunUpdate::default().with_output("a", json!(1))).unwrap();
        let before = run.clone();

        let update = RunUpdate::default()
            .with_output("b", json!(2))
            .with_output("a", json!(3))
            .with_cursor(4);
        assert!(run.apply(&update).is_err());
        assert_eq!(run, before);
    }

    #[test]
    fn terminal_runs_are_immutable() {
        let mut run = running_run();
        run.apply(&RunUpdate::status(RunStatus::Completed)).unwrap();
        assert!(run.completed_at.is_some());

        let err = run.apply(&RunUpdate::default().with_cursor(1)).unwrap_err();
        assert!(matches!(err, RunError::Terminal(_)));
    }

    #[test]
    fn invalid_transitions_are_refused() {
        let mut run = WorkflowRun::new("w", TriggerSource::Api, json!({}));
        assert!(run.apply(&RunUpdate::status(RunStatus::Paused)).is_err());
        assert!(run.apply(&RunUpdate::status(RunStatus::Running)).is_ok());
        assert!(run.apply(&RunUpdate::status(RunStatus::Pending)).is_err());
    }

    #[test]
    fn continuation_keeps_resolved_steps_only() {
        let mut failed = running_run();
        failed
            .apply(
                &RunUpdate::default()
                    .with_output("validate", json!(true))
                    .with_step("validate", StepState::Succeeded)
                    .with_step("enrich", StepState::Failed)
                    .with_cursor(1)
                    .with_status(RunStatus::Failed),
            )
            .unwrap();

        let next = WorkflowRun::continuation_of(&failed);
        assert_ne!(next.id, failed.id);
        assert_eq!(next.resumed_from, Some(failed.id));
        assert_eq!(next.status, RunStatus::Pending);
        assert_eq!(next.cursor, 1);
        assert!(next.is_resolved("validate"));
        assert!(!next.steps.contains_key("enrich"));
        assert_eq!(next.context.get("validate"), Some(&json!(true)));
        assert_eq!(next.plan, "validate;enrich");
    }

    #[test]
    fn context_view_drops_named_keys() {
        let mut ctx = RunContext::new(json!({"id": 1}));
        ctx.insert("photos", json!({"enhanced": 12})).unwrap();
        ctx.insert("validate", json!(true)).unwrap();

        let view = ctx.without(&["photos", "video"]);
        assert_eq!(view.to_value(), json!({"trigger": {"id": 1}, "validate": true}));
        assert_eq!(ctx.len(), 3);
    }
}

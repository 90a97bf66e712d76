//! Drives workflow runs through their stage plan.

use crate::executor::{ExecuteOptions, SkillExecutor};
use crate::registry::SkillRegistry;
use crate::store::{RunFilter, RunStore};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skillcore::{
    DomainEvent, ErrorKind, EventBus, ExecutionEvent, ExecutionRecord, FlowError, Notifier,
    PauseStep, RunError, RunId, RunStatus, RunUpdate, SkillStep, Stage, StepFailure, StepKind,
    StepSpec, StepState, TriggerSource, WorkflowDefinition, WorkflowRun,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// What to do when an optional step fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionalFailurePolicy {
    /// Record it in the execution log only.
    Ignore,
    /// Also log a warning.
    #[default]
    Warn,
    /// Also raise `DomainEvent::OptionalStepFailed` through the notifier.
    Escalate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub optional_failure_policy: OptionalFailurePolicy,
}

/// Approval handed to a paused run when it is resumed
struct Approval(Option<Value>);

enum StepOutcome {
    Succeeded(ExecutionRecord),
    Failed(StepFailure, Option<ExecutionRecord>),
}

enum StageOutcome {
    Advance,
    Halt(StepFailure),
    Pause,
}

/// Workflow state machine.
///
/// `Pending -> Running -> {Completed | Failed | Paused}`; progress is
/// persisted after every step so a run can be picked up after a crash.
pub struct WorkflowRunner {
    registry: Arc<SkillRegistry>,
    executor: Arc<SkillExecutor>,
    store: Arc<dyn RunStore>,
    events: Arc<EventBus>,
    notifier: Arc<dyn Notifier>,
    config: RunnerConfig,
    active: Mutex<HashMap<RunId, CancellationToken>>,
    /// Held while a failed run's continuation is looked up or created.
    continuations: tokio::sync::Mutex<()>,
}

impl WorkflowRunner {
    pub fn new(
        registry: Arc<SkillRegistry>,
        executor: Arc<SkillExecutor>,
        store: Arc<dyn RunStore>,
        events: Arc<EventBus>,
        notifier: Arc<dyn Notifier>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            store,
            events,
            notifier,
            config,
            active: Mutex::new(HashMap::new()),
            continuations: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a run for `definition` and drive it until it completes, fails
    /// or pauses.
    pub async fn start(
        &self,
        definition: &WorkflowDefinition,
        source: TriggerSource,
        payload: Value,
    ) -> Result<WorkflowRun, FlowError> {
        let run = WorkflowRun::new(&definition.name, source, payload)
            .with_plan(definition.plan_signature());
        self.store.create_run(&run).await?;
        tracing::info!(
            "Created run {} of workflow {} (trigger: {})",
            run.id,
            definition.name,
            source
        );
        self.drive(definition, run, None).await
    }

    /// Pick a run up again.
    ///
    /// Completed runs are returned unchanged. Paused runs are approved, with
    /// `approval` stored under the pause step's key, and continue. Pending or
    /// running runs (left behind by a crash) continue from their cursor.
    /// Failed runs stay as they are; a single continuation run picks up
    /// from where they stopped, and later resumes of the failed run land on
    /// that continuation instead of starting another.
    ///
    /// Runs recorded against a different stage plan are refused with
    /// `RunError::DefinitionMismatch`.
    pub async fn resume(
        &self,
        definition: &WorkflowDefinition,
        run_id: RunId,
        approval: Option<Value>,
    ) -> Result<WorkflowRun, FlowError> {
        let mut run = self.store.get_run(run_id).await?;
        check_definition(definition, &run)?;
        if run.status == RunStatus::Failed {
            run = self.continuation(run).await?;
        }

        let run_id = run.id;
        match run.status {
            RunStatus::Completed => {
                tracing::info!("Run {} already completed, nothing to resume", run_id);
                Ok(run)
            }
            RunStatus::Failed => Ok(run),
            RunStatus::Paused => {
                tracing::info!("Resuming paused run {}", run_id);
                self.drive(definition, run, Some(Approval(approval))).await
            }
            RunStatus::Pending | RunStatus::Running => {
                tracing::info!("Recovering run {} at stage {}", run_id, run.cursor);
                self.drive(definition, run, None).await
            }
        }
    }

    /// Follow the chain of continuations from `failed` to its latest run,
    /// creating the next link only when the chain ends in a failure with no
    /// continuation yet.
    async fn continuation(&self, failed: WorkflowRun) -> Result<WorkflowRun, FlowError> {
        let _guard = self.continuations.lock().await;
        let failed_id = failed.id;
        let mut latest = failed;
        loop {
            let existing = self
                .store
                .list_runs(&RunFilter::default().resumed_from(latest.id))
                .await?;
            match existing.into_iter().next() {
                Some(next) => latest = next,
                None if latest.status == RunStatus::Failed => {
                    let next = WorkflowRun::continuation_of(&latest);
                    self.store.create_run(&next).await?;
                    tracing::info!("Resuming failed run {} as new run {}", latest.id, next.id);
                    return Ok(next);
                }
                None => {
                    tracing::info!(
                        "Failed run {} was already continued; latest run is {}",
                        failed_id,
                        latest.id
                    );
                    return Ok(latest);
                }
            }
        }
    }

    /// Cancel a run.
    ///
    /// An active run has its in-flight handlers cancelled and fails once they
    /// return. A run nobody is driving is failed directly. Returns false for
    /// terminal runs.
    pub async fn cancel(&self, run_id: RunId) -> Result<bool, FlowError> {
        let token = self.lock_active().get(&run_id).cloned();
        if let Some(token) = token {
            tracing::info!("Cancelling active run {}", run_id);
            token.cancel();
            return Ok(true);
        }

        let run = self.store.get_run(run_id).await?;
        if run.is_terminal() {
            return Ok(false);
        }
        let failure = cancellation_failure(&run, None);
        tracing::info!("Cancelling idle run {}", run_id);
        self.fail(run, failure).await?;
        Ok(true)
    }

    pub fn is_active(&self, run_id: RunId) -> bool {
        self.lock_active().contains_key(&run_id)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, CancellationToken>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        run: WorkflowRun,
        approval: Option<Approval>,
    ) -> Result<WorkflowRun, FlowError> {
        let token = CancellationToken::new();
        {
            let mut active = self.lock_active();
            if active.contains_key(&run.id) {
                return Err(RunError::AlreadyActive(run.id.to_string()).into());
            }
            active.insert(run.id, token.clone());
        }
        let _active = ActiveRun {
            runner: self,
            run_id: run.id,
        };

        // Another driver may have finished it since the caller read it.
        let run = self.store.get_run(run.id).await?;
        if run.is_terminal() {
            return Ok(run);
        }
        self.drive_stages(definition, run, approval, &token).await
    }

    #[instrument(
        name = "workflow.drive",
        skip_all,
        fields(run_id = %run.id, workflow = %definition.name)
    )]
    async fn drive_stages(
        &self,
        definition: &WorkflowDefinition,
        mut run: WorkflowRun,
        mut approval: Option<Approval>,
        token: &CancellationToken,
    ) -> Result<WorkflowRun, FlowError> {
        if run.status != RunStatus::Running {
            run = self
                .store
                .update_run(run.id, &RunUpdate::status(RunStatus::Running))
                .await?;
            self.events.emit(ExecutionEvent::RunStarted {
                run_id: run.id,
                workflow: run.workflow.clone(),
                timestamp: Utc::now(),
            });
        }

        let stages = definition.stages();
        while run.cursor < stages.len() {
            let stage = &stages[run.cursor];
            if token.is_cancelled() {
                let failure = cancellation_failure(&run, stage.steps().first().map(|(i, s)| (*i, *s)));
                return self.fail(run, failure).await;
            }

            let outcome = match stage {
                Stage::Single { index, step } => match &step.kind {
                    StepKind::Skill(skill) => {
                        self.run_skill_stage(&mut run, &[(*index, *step, skill)], token)
                            .await?
                    }
                    StepKind::Pause(pause) => {
                        self.run_pause(&mut run, step, pause, approval.take()).await?
                    }
                },
                Stage::Group { name, steps } => {
                    let members: Vec<(usize, &StepSpec, &SkillStep)> = steps
                        .iter()
                        .filter_map(|(index, step)| match &step.kind {
                            StepKind::Skill(skill) => Some((*index, *step, skill)),
                            StepKind::Pause(_) => None,
                        })
                        .collect();
                    tracing::info!(
                        "Run {} entering parallel group {} ({} steps)",
                        run.id,
                        name,
                        members.len()
                    );
                    self.run_skill_stage(&mut run, &members, token).await?
                }
            };

            match outcome {
                StageOutcome::Advance => {
                    run = self
                        .store
                        .update_run(run.id, &RunUpdate::default().with_cursor(run.cursor + 1))
                        .await?;
                }
                StageOutcome::Halt(failure) => return self.fail(run, failure).await,
                StageOutcome::Pause => return Ok(run),
            }
        }

        self.complete(run).await
    }

    /// Run every unresolved step of a stage concurrently and merge each result
    /// as it arrives. Returns once all of them have resolved.
    async fn run_skill_stage(
        &self,
        run: &mut WorkflowRun,
        steps: &[(usize, &StepSpec, &SkillStep)],
        token: &CancellationToken,
    ) -> Result<StageOutcome, FlowError> {
        let run_id = run.id;
        let source = run.trigger_source;
        let siblings: Vec<&str> = steps.iter().map(|(_, step, _)| step.key.as_str()).collect();
        let view = run.context.without(&siblings);

        let work: Vec<(usize, &StepSpec, &SkillStep, Value)> = steps
            .iter()
            .filter(|(_, step, _)| {
                let resolved = run.is_resolved(&step.key);
                if resolved {
                    tracing::debug!("Step {} already resolved, skipping", step.key);
                }
                !resolved
            })
            .map(|&(index, step, skill)| (index, step, skill, skill.input.apply(&view)))
            .collect();

        let mut pending: FuturesUnordered<_> = work
            .into_iter()
            .map(|(index, step, skill, input)| async move {
                let outcome = self
                    .execute_step(run_id, source, index, step, skill, input, token)
                    .await;
                (index, step, outcome)
            })
            .collect();

        let mut halt: Option<StepFailure> = None;
        while let Some((index, step, outcome)) = pending.next().await {
            if let Some(failure) = self.resolve_step(run, index, step, outcome).await? {
                if halt.as_ref().map_or(true, |h| failure.step_index < h.step_index) {
                    halt = Some(failure);
                }
            }
        }

        Ok(match halt {
            Some(failure) => StageOutcome::Halt(failure),
            None => StageOutcome::Advance,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_step(
        &self,
        run_id: RunId,
        source: TriggerSource,
        index: usize,
        step: &StepSpec,
        skill: &SkillStep,
        input: Value,
        token: &CancellationToken,
    ) -> StepOutcome {
        let descriptor = match self.registry.resolve(&skill.skill_id) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                return StepOutcome::Failed(
                    StepFailure {
                        step_index: index,
                        step_key: step.key.clone(),
                        skill_id: Some(skill.skill_id.clone()),
                        attempt: 0,
                        kind: ErrorKind::Fatal,
                        message: e.to_string(),
                        execution_id: None,
                    },
                    None,
                );
            }
        };

        self.events.emit(ExecutionEvent::StepStarted {
            run_id,
            step_key: step.key.clone(),
            skill_id: skill.skill_id.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!("Run {} starting step {} ({})", run_id, step.key, skill.skill_id);

        let mut options = ExecuteOptions::new(source)
            .for_step(run_id, index, &step.key)
            .with_cancellation(token.child_token());
        if let Some(ms) = skill.timeout_ms {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = skill.max_retries {
            options = options.with_max_retries(retries);
        }

        let record = self.executor.execute(descriptor, input, options).await;
        if record.is_success() {
            return StepOutcome::Succeeded(record);
        }

        let (kind, message) = record
            .error
            .as_ref()
            .map(|e| (e.kind, e.message.clone()))
            .unwrap_or_else(|| (ErrorKind::Fatal, format!("execution ended as {}", record.status)));
        StepOutcome::Failed(
            StepFailure {
                step_index: index,
                step_key: step.key.clone(),
                skill_id: Some(skill.skill_id.clone()),
                attempt: record.attempt,
                kind,
                message,
                execution_id: Some(record.id),
            },
            Some(record),
        )
    }

    /// Persist one step's resolution. Returns the failure if it halts the run.
    async fn resolve_step(
        &self,
        run: &mut WorkflowRun,
        index: usize,
        step: &StepSpec,
        outcome: StepOutcome,
    ) -> Result<Option<StepFailure>, FlowError> {
        match outcome {
            StepOutcome::Succeeded(record) => {
                let update = RunUpdate::default()
                    .with_output(&step.key, record.output.clone().unwrap_or(Value::Null))
                    .with_step(&step.key, StepState::Succeeded)
                    .with_execution(record.id);
                *run = self.store.update_run(run.id, &update).await?;

                tracing::info!("Run {} step {} succeeded", run.id, step.key);
                self.events.emit(ExecutionEvent::StepCompleted {
                    run_id: run.id,
                    step_key: step.key.clone(),
                    execution_id: record.id,
                    duration_ms: record.duration_ms.unwrap_or(0),
                    timestamp: Utc::now(),
                });
                Ok(None)
            }
            StepOutcome::Failed(failure, record) => {
                // a cancelled optional step is still unresolved work
                let halts = step.required || failure.kind == ErrorKind::Cancelled;
                let state = if halts {
                    StepState::Failed
                } else {
                    StepState::OptionalFailed
                };
                let mut update = RunUpdate::default().with_step(&step.key, state);
                if let Some(record) = &record {
                    update = update.with_execution(record.id);
                }
                *run = self.store.update_run(run.id, &update).await?;

                self.events.emit(ExecutionEvent::StepFailed {
                    run_id: run.id,
                    step_key: step.key.clone(),
                    required: step.required,
                    error: failure.to_string(),
                    timestamp: Utc::now(),
                });

                if halts {
                    tracing::error!("Run {} step #{} failed: {}", run.id, index, failure);
                    return Ok(Some(failure));
                }
                self.optional_failed(run, failure);
                Ok(None)
            }
        }
    }

    fn optional_failed(&self, run: &WorkflowRun, failure: StepFailure) {
        match self.config.optional_failure_policy {
            OptionalFailurePolicy::Ignore => {
                tracing::debug!("Run {} optional {}", run.id, failure);
            }
            OptionalFailurePolicy::Warn => {
                tracing::warn!("Run {} continuing past optional {}", run.id, failure);
            }
            OptionalFailurePolicy::Escalate => {
                tracing::warn!("Run {} continuing past optional {}", run.id, failure);
                self.notifier.notify(DomainEvent::OptionalStepFailed {
                    run_id: run.id,
                    workflow: run.workflow.clone(),
                    failure,
                });
            }
        }
    }

    async fn run_pause(
        &self,
        run: &mut WorkflowRun,
        step: &StepSpec,
        pause: &PauseStep,
        approval: Option<Approval>,
    ) -> Result<StageOutcome, FlowError> {
        if run.is_resolved(&step.key) {
            return Ok(StageOutcome::Advance);
        }

        if let Some(Approval(payload)) = approval {
            let mut update = RunUpdate::default().with_step(&step.key, StepState::Approved);
            if let Some(payload) = payload {
                update = update.with_output(&step.key, payload);
            }
            *run = self.store.update_run(run.id, &update).await?;
            tracing::info!("Run {} pause step {} approved", run.id, step.key);
            return Ok(StageOutcome::Advance);
        }

        *run = self
            .store
            .update_run(run.id, &RunUpdate::status(RunStatus::Paused))
            .await?;
        tracing::info!("Run {} paused at {}: {}", run.id, step.key, pause.message);
        self.events.emit(ExecutionEvent::RunPaused {
            run_id: run.id,
            step_key: step.key.clone(),
            message: pause.message.clone(),
            timestamp: Utc::now(),
        });
        Ok(StageOutcome::Pause)
    }

    async fn complete(&self, run: WorkflowRun) -> Result<WorkflowRun, FlowError> {
        let run = self
            .store
            .update_run(run.id, &RunUpdate::status(RunStatus::Completed))
            .await?;
        let duration_ms = run.duration_ms().unwrap_or(0);
        tracing::info!("Run {} completed in {}ms", run.id, duration_ms);

        self.events.emit(ExecutionEvent::RunCompleted {
            run_id: run.id,
            duration_ms,
            timestamp: Utc::now(),
        });
        self.notifier.notify(DomainEvent::RunCompleted {
            run_id: run.id,
            workflow: run.workflow.clone(),
            trigger_source: run.trigger_source,
            output: run.context.to_value(),
        });
        Ok(run)
    }

    async fn fail(&self, run: WorkflowRun, failure: StepFailure) -> Result<WorkflowRun, FlowError> {
        let run = self
            .store
            .update_run(
                run.id,
                &RunUpdate::status(RunStatus::Failed).with_error(failure.clone()),
            )
            .await?;
        tracing::error!("Run {} failed at {}", run.id, failure);

        self.events.emit(ExecutionEvent::RunFailed {
            run_id: run.id,
            error: failure.to_string(),
            timestamp: Utc::now(),
        });
        self.notifier.notify(DomainEvent::RunFailed {
            run_id: run.id,
            workflow: run.workflow.clone(),
            trigger_source: run.trigger_source,
            failure,
        });
        Ok(run)
    }
}

/// Deregisters a run from the active set when its driver returns.
struct ActiveRun<'a> {
    runner: &'a WorkflowRunner,
    run_id: RunId,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.runner.lock_active().remove(&self.run_id);
    }
}

fn cancellation_failure(run: &WorkflowRun, at: Option<(usize, &StepSpec)>) -> StepFailure {
    let (step_index, step_key, skill_id) = match at {
        Some((index, step)) => (index, step.key.clone(), step.skill_id().map(str::to_string)),
        None => (run.cursor, String::new(), None),
    };
    StepFailure {
        step_index,
        step_key,
        skill_id,
        attempt: 0,
        kind: ErrorKind::Cancelled,
        message: "run cancelled".to_string(),
        execution_id: None,
    }
}

/// Refuse a run that was started from another workflow, or from an earlier
/// version of this one whose stage plan no longer lines up with its cursor.
fn check_definition(definition: &WorkflowDefinition, run: &WorkflowRun) -> Result<(), RunError> {
    let plan = definition.plan_signature();
    let renamed = run.workflow != definition.name;
    let replanned = !run.plan.is_empty() && run.plan != plan;
    if !renamed && !replanned {
        return Ok(());
    }
    Err(RunError::DefinitionMismatch {
        run_id: run.id.to_string(),
        expected: format!("{} [{}]", definition.name, plan),
        actual: format!("{} [{}]", run.workflow, run.plan),
    })
}

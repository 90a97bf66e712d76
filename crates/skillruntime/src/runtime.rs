use crate::composer::{validate_definition, WorkflowComposer};
use crate::executor::{ExecuteOptions, ExecutorConfig, SkillExecutor};
use crate::registry::SkillRegistry;
use crate::runner::{RunnerConfig, WorkflowRunner};
use crate::stats::{self, SkillStats, WorkflowStats};
use crate::store::{ExecutionLog, ExecutionQuery, MemoryStore, RunFilter, RunStore};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use skillcore::{
    EventBus, ExecutionEvent, ExecutionRecord, FlowError, Notifier, NoopNotifier, RunError,
    RunId, RunStatus, TriggerSource, WorkflowDefinition, WorkflowError, WorkflowRun,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Main entry point: owns the registry, executor, runner and store, and the
/// set of registered workflow definitions.
pub struct SkillRuntime {
    registry: Arc<SkillRegistry>,
    executor: Arc<SkillExecutor>,
    runner: Arc<WorkflowRunner>,
    store: Arc<dyn RunStore>,
    log: Arc<dyn ExecutionLog>,
    event_bus: Arc<EventBus>,
    workflows: Arc<RwLock<HashMap<String, Arc<WorkflowDefinition>>>>,
}

impl SkillRuntime {
    /// In-memory runtime with default settings
    pub fn new(registry: Arc<SkillRegistry>) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: Arc<SkillRegistry>, config: RuntimeConfig) -> Self {
        Self::with_store(
            registry,
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(NoopNotifier),
        )
    }

    /// Runtime persisting runs and execution records to `store`.
    pub fn with_store<S>(
        registry: Arc<SkillRegistry>,
        config: RuntimeConfig,
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
    ) -> Self
    where
        S: RunStore + ExecutionLog + 'static,
    {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let log: Arc<dyn ExecutionLog> = store.clone();
        let store: Arc<dyn RunStore> = store;

        let executor = Arc::new(SkillExecutor::new(
            config.executor,
            log.clone(),
            event_bus.clone(),
        ));
        let runner = Arc::new(WorkflowRunner::new(
            registry.clone(),
            executor.clone(),
            store.clone(),
            event_bus.clone(),
            notifier,
            config.runner,
        ));

        Self {
            registry,
            executor,
            runner,
            store,
            log,
            event_bus,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<SkillExecutor> {
        &self.executor
    }

    pub fn runner(&self) -> &Arc<WorkflowRunner> {
        &self.runner
    }

    /// Start composing a workflow against this runtime's registry
    pub fn composer(
        &self,
        name: impl Into<String>,
        trigger: impl Into<String>,
    ) -> WorkflowComposer<'_> {
        WorkflowComposer::new(&self.registry, name, trigger)
    }

    /// Validate and register a workflow, replacing any with the same name.
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> Result<(), FlowError> {
        validate_definition(&definition, &self.registry)?;
        tracing::info!(
            "Registering workflow: {} (trigger: {})",
            definition.name,
            definition.trigger
        );
        let mut workflows = self.workflows.write().await;
        workflows.insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub async fn workflow(&self, name: &str) -> Result<Arc<WorkflowDefinition>, FlowError> {
        self.workflows
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::Workflow(WorkflowError::NotFound(name.to_string())))
    }

    /// Registered workflows, ordered by name
    pub async fn list_workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut workflows: Vec<_> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        workflows
    }

    /// Start a run of every workflow whose trigger is `event`.
    ///
    /// Matching runs are driven concurrently. Runs that fail still count as
    /// started; only infrastructure errors are returned as `Err`.
    pub async fn trigger(
        &self,
        event: &str,
        source: TriggerSource,
        payload: serde_json::Value,
    ) -> Result<Vec<WorkflowRun>, FlowError> {
        let matching: Vec<_> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.trigger == event)
            .cloned()
            .collect();
        if matching.is_empty() {
            tracing::debug!("No workflow listens to {}", event);
            return Ok(Vec::new());
        }

        let runs = join_all(
            matching
                .iter()
                .map(|definition| self.runner.start(definition, source, payload.clone())),
        )
        .await;
        runs.into_iter().collect()
    }

    /// Start a run of a registered workflow.
    pub async fn run_workflow(
        &self,
        name: &str,
        source: TriggerSource,
        payload: serde_json::Value,
    ) -> Result<WorkflowRun, FlowError> {
        let definition = self.workflow(name).await?;
        self.runner.start(&definition, source, payload).await
    }

    /// Resume a run; see [`WorkflowRunner::resume`].
    pub async fn resume(
        &self,
        run_id: RunId,
        approval: Option<serde_json::Value>,
    ) -> Result<WorkflowRun, FlowError> {
        let run = self.store.get_run(run_id).await?;
        let definition = self.workflow(&run.workflow).await?;
        self.runner.resume(&definition, run_id, approval).await
    }

    pub async fn cancel(&self, run_id: RunId) -> Result<bool, FlowError> {
        self.runner.cancel(run_id).await
    }

    /// Continue every pending or running run left behind by a previous
    /// process. Runs of unregistered workflows are skipped.
    pub async fn recover(&self) -> Result<Vec<WorkflowRun>, FlowError> {
        let mut recovered = Vec::new();
        for status in [RunStatus::Pending, RunStatus::Running] {
            for run in self.store.list_runs(&RunFilter::default().status(status)).await? {
                if self.runner.is_active(run.id) {
                    continue;
                }
                let Ok(definition) = self.workflow(&run.workflow).await else {
                    tracing::warn!(
                        "Cannot recover run {}: workflow {} is not registered",
                        run.id,
                        run.workflow
                    );
                    continue;
                };
                match self.runner.resume(&definition, run.id, None).await {
                    Ok(run) => recovered.push(run),
                    Err(FlowError::Run(e @ RunError::DefinitionMismatch { .. })) => {
                        tracing::warn!("Cannot recover run {}: {}", run.id, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(recovered)
    }

    /// Execute one skill outside any workflow.
    pub async fn execute_skill(
        &self,
        skill_id: &str,
        input: serde_json::Value,
        options: ExecuteOptions,
    ) -> Result<ExecutionRecord, FlowError> {
        let descriptor = self.registry.resolve(skill_id)?;
        Ok(self.executor.execute(descriptor, input, options).await)
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<WorkflowRun, FlowError> {
        Ok(self.store.get_run(run_id).await?)
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, FlowError> {
        Ok(self.store.list_runs(filter).await?)
    }

    pub async fn executions(&self, query: &ExecutionQuery) -> Result<Vec<ExecutionRecord>, FlowError> {
        Ok(self.log.query_executions(query).await?)
    }

    pub async fn skill_stats(&self, query: &ExecutionQuery) -> Result<Vec<SkillStats>, FlowError> {
        let records = self.log.query_executions(query).await?;
        Ok(stats::skill_stats(&records))
    }

    pub async fn workflow_stats(&self, filter: &RunFilter) -> Result<Vec<WorkflowStats>, FlowError> {
        let runs = self.store.list_runs(filter).await?;
        Ok(stats::workflow_stats(&runs))
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    pub executor: ExecutorConfig,
    pub runner: RunnerConfig,
}

impl RuntimeConfig {
    /// Load a JSON configuration file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            executor: ExecutorConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::OptionalFailurePolicy;

    #[test]
    fn partial_config_fills_defaults() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{"executor": {"cancel_grace_ms": 250}, "runner": {"optional_failure_policy": "escalate"}}"#,
        )
        .unwrap();
        assert_eq!(config.event_buffer_size, 1000);
        assert_eq!(config.executor.cancel_grace_ms, 250);
        assert_eq!(config.executor.max_concurrent_invocations, 32);
        assert_eq!(
            config.runner.optional_failure_policy,
            OptionalFailurePolicy::Escalate
        );
    }
}

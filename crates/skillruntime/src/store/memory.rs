use super::{ExecutionLog, ExecutionQuery, RunFilter, RunStore};
use async_trait::async_trait;
use skillcore::{ExecutionRecord, RunId, RunUpdate, StoreError, WorkflowRun};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process store for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<RunId, WorkflowRun>>,
    executions: RwLock<Vec<ExecutionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLog for MemoryStore {
    async fn append_execution_record(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        self.executions.write().await.push(record.clone());
        Ok(())
    }

    async fn query_executions(
        &self,
        query: &ExecutionQuery,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut records: Vec<_> = self
            .executions
            .read()
            .await
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        query.truncate(&mut records);
        Ok(records)
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(StoreError::Duplicate(run.id.to_string()));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run(&self, id: RunId, update: &RunUpdate) -> Result<WorkflowRun, StoreError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&id)
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))?;
        run.apply(update)?;
        Ok(run.clone())
    }

    async fn get_run(&self, id: RunId) -> Result<WorkflowRun, StoreError> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(id.to_string()))
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, StoreError> {
        let runs = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(filter.finish(runs))
    }
}

//! Persistence for runs and the append-only execution log.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skillcore::{
    ExecutionRecord, ExecutionStatus, RunId, RunStatus, RunUpdate, StoreError, WorkflowRun,
};

/// Append-only audit trail of execution attempts.
///
/// Implementations must accept concurrent appends.
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn append_execution_record(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// Matching records in append order.
    async fn query_executions(
        &self,
        query: &ExecutionQuery,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// Storage for workflow runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    /// Apply `update` to the stored run and return the result.
    ///
    /// Updates are all-or-nothing; terminal runs reject every update.
    async fn update_run(&self, id: RunId, update: &RunUpdate) -> Result<WorkflowRun, StoreError>;

    async fn get_run(&self, id: RunId) -> Result<WorkflowRun, StoreError>;

    /// Matching runs, oldest first.
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, StoreError>;
}

/// Execution log query; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct ExecutionQuery {
    pub skill_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
    pub correlation_id: Option<RunId>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl ExecutionQuery {
    pub fn skill(mut self, skill_id: impl Into<String>) -> Self {
        self.skill_id = Some(skill_id.into());
        self
    }

    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn correlation(mut self, run_id: RunId) -> Self {
        self.correlation_id = Some(run_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        self.skill_id.as_deref().map_or(true, |id| record.skill_id == id)
            && self.status.map_or(true, |s| record.status == s)
            && self.from.map_or(true, |from| record.created_at >= from)
            && self.to.map_or(true, |to| record.created_at < to)
            && self
                .correlation_id
                .map_or(true, |id| record.correlation_id == Some(id))
    }

    pub(crate) fn truncate(&self, records: &mut Vec<ExecutionRecord>) {
        if let Some(limit) = self.limit {
            if records.len() > limit {
                records.drain(..records.len() - limit);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub workflow: Option<String>,
    pub status: Option<RunStatus>,
    /// Only continuations of this failed run.
    pub resumed_from: Option<RunId>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl RunFilter {
    pub fn workflow(mut self, workflow: impl Into<String>) -> Self {
        self.workflow = Some(workflow.into());
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn resumed_from(mut self, run_id: RunId) -> Self {
        self.resumed_from = Some(run_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, run: &WorkflowRun) -> bool {
        self.workflow.as_deref().map_or(true, |w| run.workflow == w)
            && self.status.map_or(true, |s| run.status == s)
            && self
                .resumed_from
                .map_or(true, |id| run.resumed_from == Some(id))
    }

    pub(crate) fn finish(&self, mut runs: Vec<WorkflowRun>) -> Vec<WorkflowRun> {
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = self.limit {
            if runs.len() > limit {
                runs.drain(..runs.len() - limit);
            }
        }
        runs
    }
}

use super::{ExecutionLog, ExecutionQuery, RunFilter, RunStore};
use async_trait::async_trait;
use skillcore::{ExecutionRecord, RunId, RunUpdate, StoreError, WorkflowRun};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const RUNS_DIR: &str = "runs";
const EXECUTIONS_FILE: &str = "executions.jsonl";

/// Directory-backed store.
///
/// Layout:
///
/// ```text
/// <root>/runs/<run id>.json   one document per run, replaced atomically
/// <root>/executions.jsonl     execution log, one record per line
/// ```
///
/// Writes from one process are serialized; the store is not safe to share
/// between processes writing the same run.
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(RUNS_DIR)).await?;
        tracing::debug!("Opened file store at {}", root.display());
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, id: RunId) -> PathBuf {
        self.root.join(RUNS_DIR).join(format!("{}.json", id))
    }

    async fn read_run(&self, id: RunId) -> Result<WorkflowRun, StoreError> {
        match fs::read(self.run_path(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::RunNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let path = self.run_path(run.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(run)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl ExecutionLog for FileStore {
    async fn append_execution_record(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(EXECUTIONS_FILE))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn query_executions(
        &self,
        query: &ExecutionQuery,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let content = match fs::read_to_string(self.root.join(EXECUTIONS_FILE)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExecutionRecord>(line) {
                Ok(record) if query.matches(&record) => records.push(record),
                Ok(_) => {}
                // a torn final line after a crash
                Err(e) => tracing::warn!("Skipping unreadable execution record at line {}: {}", number + 1, e),
            }
        }
        query.truncate(&mut records);
        Ok(records)
    }
}

#[async_trait]
impl RunStore for FileStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if fs::try_exists(self.run_path(run.id)).await? {
            return Err(StoreError::Duplicate(run.id.to_string()));
        }
        self.write_run(run).await
    }

    async fn update_run(&self, id: RunId, update: &RunUpdate) -> Result<WorkflowRun, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut run = self.read_run(id).await?;
        run.apply(update)?;
        self.write_run(&run).await?;
        Ok(run)
    }

    async fn get_run(&self, id: RunId) -> Result<WorkflowRun, StoreError> {
        self.read_run(id).await
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut runs = Vec::new();
        let mut entries = fs::read_dir(self.root.join(RUNS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<WorkflowRun>(&bytes) {
                Ok(run) if filter.matches(&run) => runs.push(run),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable run file {}: {}", path.display(), e),
            }
        }
        Ok(filter.finish(runs))
    }
}

use crate::store::ExecutionLog;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use skillcore::{
    Backoff, EventBus, ExecutionEvent, ExecutionRecord, RunId, SkillContext, SkillDescriptor,
    SkillError, SkillOutput, TriggerSource,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Global cap on in-flight handler invocations.
    pub max_concurrent_invocations: usize,
    /// How long a cancelled handler gets to return before its task is aborted.
    pub cancel_grace_ms: u64,
    /// Upper bound applied to every per-attempt timeout.
    pub max_timeout_ms: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_invocations: 32,
            cancel_grace_ms: 1_000,
            max_timeout_ms: None,
        }
    }
}

/// Per-call overrides of a descriptor's defaults
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub backoff: Option<Backoff>,
    pub trigger_source: TriggerSource,
    pub run_id: Option<RunId>,
    pub step_index: Option<usize>,
    pub step_key: Option<String>,
    /// Cancelling this token cancels the in-flight attempt, permit waits and
    /// backoff sleeps.
    pub cancellation: CancellationToken,
}

impl ExecuteOptions {
    pub fn new(trigger_source: TriggerSource) -> Self {
        Self {
            timeout: None,
            max_retries: None,
            backoff: None,
            trigger_source,
            run_id: None,
            step_index: None,
            step_key: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn for_step(mut self, run_id: RunId, index: usize, key: impl Into<String>) -> Self {
        self.run_id = Some(run_id);
        self.step_index = Some(index);
        self.step_key = Some(key.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self::new(TriggerSource::Api)
    }
}

/// Runs a single skill under its timeout, retry and concurrency policy.
pub struct SkillExecutor {
    config: ExecutorConfig,
    log: Arc<dyn ExecutionLog>,
    events: Arc<EventBus>,
    global: Arc<Semaphore>,
    per_skill: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl SkillExecutor {
    pub fn new(config: ExecutorConfig, log: Arc<dyn ExecutionLog>, events: Arc<EventBus>) -> Self {
        let global = Arc::new(Semaphore::new(config.max_concurrent_invocations.max(1)));
        Self {
            config,
            log,
            events,
            global,
            per_skill: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute `descriptor` against `input`.
    ///
    /// Always terminates: the returned record is the final attempt, in a
    /// terminal status. Every attempt is appended to the execution log.
    #[instrument(
        name = "skill.execute",
        skip(self, descriptor, input, options),
        fields(skill_id = %descriptor.id, run_id = ?options.run_id, step = ?options.step_key)
    )]
    pub async fn execute(
        &self,
        descriptor: &SkillDescriptor,
        input: serde_json::Value,
        options: ExecuteOptions,
    ) -> ExecutionRecord {
        let timeout = self.effective_timeout(options.timeout.unwrap_or(descriptor.timeout));
        let max_retries = options.max_retries.unwrap_or(descriptor.retry.max_retries);
        let backoff = options
            .backoff
            .clone()
            .unwrap_or_else(|| descriptor.retry.backoff.clone());
        let cancel = &options.cancellation;

        if let Err(err) = descriptor.validate_input(&input) {
            tracing::warn!("Rejected input for skill {}: {}", descriptor.id, err);
            let mut record = self.new_record(descriptor, &input, 1, &options);
            settle(&mut record, Err(err));
            self.finish(&record, false).await;
            return record;
        }

        let mut attempt = 1;
        loop {
            let mut record = self.new_record(descriptor, &input, attempt, &options);
            let result = self
                .attempt(descriptor, &input, &mut record, timeout, &options)
                .await;

            let will_retry = match &result {
                Ok(_) => false,
                Err(err) => {
                    attempt <= max_retries && is_retryable(err, descriptor) && !cancel.is_cancelled()
                }
            };
            settle(&mut record, result);
            record.retried = will_retry;
            self.finish(&record, will_retry).await;

            if !will_retry {
                return record;
            }

            let delay = jittered(backoff.base_delay(attempt), backoff.jitter);
            tracing::warn!(
                "Skill {} attempt {} failed ({}), retrying in {:?}",
                descriptor.id,
                attempt,
                record.error.as_ref().map(|e| e.message.as_str()).unwrap_or("unknown"),
                delay
            );
            // a cancelled backoff falls through; the next attempt records the cancellation
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        descriptor: &SkillDescriptor,
        input: &serde_json::Value,
        record: &mut ExecutionRecord,
        timeout: Duration,
        options: &ExecuteOptions,
    ) -> Result<SkillOutput, SkillError> {
        let cancel = &options.cancellation;
        let _permits = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SkillError::Cancelled),
            permits = self.acquire(descriptor) => permits?,
        };

        if let Err(e) = record.start() {
            tracing::debug!("Execution {} could not start: {}", record.id, e);
        }

        let token = cancel.child_token();
        let ctx = SkillContext {
            execution_id: record.id,
            skill_id: descriptor.id.clone(),
            attempt: record.attempt,
            run_id: options.run_id,
            trigger_source: options.trigger_source,
            deadline: Instant::now() + timeout,
            events: self.events.create_emitter(record.id, &descriptor.id),
            cancellation: token.clone(),
        };

        let handler = descriptor.handler.clone();
        let input = input.clone();
        let mut task = tokio::spawn(async move { handler.invoke(input, ctx).await });

        let interrupted = tokio::select! {
            biased;
            joined = &mut task => return joined_result(joined),
            _ = tokio::time::sleep(timeout) => SkillError::Timeout {
                ms: timeout.as_millis() as u64,
            },
            _ = cancel.cancelled() => SkillError::Cancelled,
        };

        token.cancel();
        self.reap(task, record).await;
        Err(interrupted)
    }

    /// Wait out the grace period for a cancelled handler, then abort it.
    /// Whatever it returns is dropped.
    async fn reap(
        &self,
        mut task: JoinHandle<Result<SkillOutput, SkillError>>,
        record: &ExecutionRecord,
    ) {
        let grace = Duration::from_millis(self.config.cancel_grace_ms);
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(Ok(_))) => {
                tracing::debug!("Discarding late result of execution {}", record.id);
            }
            Ok(_) => {
                tracing::debug!("Execution {} acknowledged cancellation", record.id);
            }
            Err(_) => {
                tracing::warn!(
                    "Skill {} ignored cancellation for {:?}; aborting execution {}",
                    record.skill_id,
                    grace,
                    record.id
                );
                task.abort();
            }
        }
    }

    async fn acquire(
        &self,
        descriptor: &SkillDescriptor,
    ) -> Result<(Option<OwnedSemaphorePermit>, OwnedSemaphorePermit), SkillError> {
        // per-skill first so a throttled skill does not sit on a global permit
        let skill = match self.skill_semaphore(descriptor) {
            Some(semaphore) => Some(
                semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| SkillError::fatal("skill semaphore closed"))?,
            ),
            None => None,
        };
        let global = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SkillError::fatal("executor semaphore closed"))?;
        Ok((skill, global))
    }

    fn skill_semaphore(&self, descriptor: &SkillDescriptor) -> Option<Arc<Semaphore>> {
        let limit = descriptor.concurrency_limit?;
        let mut semaphores = self.per_skill.lock().unwrap_or_else(|e| e.into_inner());
        Some(
            semaphores
                .entry(descriptor.id.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(limit.max(1))))
                .clone(),
        )
    }

    fn effective_timeout(&self, timeout: Duration) -> Duration {
        match self.config.max_timeout_ms {
            Some(max) => timeout.min(Duration::from_millis(max)),
            None => timeout,
        }
    }

    fn new_record(
        &self,
        descriptor: &SkillDescriptor,
        input: &serde_json::Value,
        attempt: u32,
        options: &ExecuteOptions,
    ) -> ExecutionRecord {
        ExecutionRecord::new(&descriptor.id, input.clone(), attempt, options.trigger_source)
            .with_correlation(options.run_id)
            .with_step(options.step_index, options.step_key.clone())
    }

    async fn finish(&self, record: &ExecutionRecord, will_retry: bool) {
        if let Err(e) = self.log.append_execution_record(record).await {
            tracing::warn!("Failed to append execution record {}: {}", record.id, e);
        }
        self.events.emit(ExecutionEvent::AttemptFinished {
            execution_id: record.id,
            skill_id: record.skill_id.clone(),
            attempt: record.attempt,
            status: record.status,
            error_kind: record.error.as_ref().map(|e| e.kind),
            will_retry,
            timestamp: Utc::now(),
        });
    }
}

fn is_retryable(err: &SkillError, descriptor: &SkillDescriptor) -> bool {
    match err {
        SkillError::Transient(_) => true,
        SkillError::Timeout { .. } => descriptor.idempotent,
        SkillError::Validation(_) | SkillError::Fatal(_) | SkillError::Cancelled => false,
    }
}

fn joined_result(
    joined: Result<Result<SkillOutput, SkillError>, JoinError>,
) -> Result<SkillOutput, SkillError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(SkillError::fatal("skill handler panicked")),
        Err(_) => Err(SkillError::Cancelled),
    }
}

fn settle(record: &mut ExecutionRecord, result: Result<SkillOutput, SkillError>) {
    let settled = match result {
        Ok(output) => record.succeed(output.data, output.usage),
        Err(err) => record.fail(&err),
    };
    if let Err(e) = settled {
        tracing::debug!("Execution {} already settled: {}", record.id, e);
    }
}

/// Uniform in [delay/2, delay].
fn jittered(delay: Duration, jitter: bool) -> Duration {
    let ms = delay.as_millis() as u64;
    if !jitter || ms < 2 {
        return delay;
    }
    Duration::from_millis(rand::thread_rng().gen_range(ms / 2..=ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_upper_half() {
        let base = Duration::from_millis(1_000);
        for _ in 0..100 {
            let d = jittered(base, true);
            assert!(d >= Duration::from_millis(500) && d <= base);
        }
        assert_eq!(jittered(base, false), base);
    }

    #[test]
    fn timeouts_retry_only_when_idempotent() {
        struct Nop;
        #[async_trait::async_trait]
        impl skillcore::Skill for Nop {
            async fn invoke(
                &self,
                input: serde_json::Value,
                _ctx: SkillContext,
            ) -> Result<SkillOutput, SkillError> {
                Ok(input.into())
            }
        }

        let plain = SkillDescriptor::new("render", Arc::new(Nop));
        let idempotent = plain.clone().idempotent(true);
        let timeout = SkillError::Timeout { ms: 10 };

        assert!(!is_retryable(&timeout, &plain));
        assert!(is_retryable(&timeout, &idempotent));
        assert!(is_retryable(&SkillError::transient("503"), &plain));
        assert!(!is_retryable(&SkillError::validation("bad"), &idempotent));
        assert!(!is_retryable(&SkillError::fatal("config"), &idempotent));
        assert!(!is_retryable(&SkillError::Cancelled, &idempotent));
    }
}

use crate::events::EventEmitter;
use crate::record::{ExecutionId, TriggerSource};
use crate::run::RunId;
use crate::SkillError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A single named unit of work.
///
/// Implementations must observe `ctx.cancellation` (or `ctx.deadline`): once
/// the token fires the executor discards whatever the handler returns, and a
/// handler that keeps running past the grace period is aborted.
#[async_trait]
pub trait Skill: Send + Sync {
    async fn invoke(
        &self,
        input: serde_json::Value,
        ctx: SkillContext,
    ) -> Result<SkillOutput, SkillError>;
}

/// Per-attempt context handed to a skill handler
#[derive(Clone)]
pub struct SkillContext {
    pub execution_id: ExecutionId,
    pub skill_id: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub run_id: Option<RunId>,
    pub trigger_source: TriggerSource,
    /// Instant after which the executor cancels the attempt
    pub deadline: Instant,
    pub events: EventEmitter,
    pub cancellation: CancellationToken,
}

impl SkillContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Drive `fut` until it completes or the attempt is cancelled.
    pub async fn until_cancelled<F, T>(&self, fut: F) -> Result<T, SkillError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(SkillError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

/// Value returned by a successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillOutput {
    pub data: serde_json::Value,
    pub usage: Option<ResourceUsage>,
}

impl SkillOutput {
    pub fn new(data: impl Into<serde_json::Value>) -> Self {
        Self {
            data: data.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

impl From<serde_json::Value> for SkillOutput {
    fn from(data: serde_json::Value) -> Self {
        Self::new(data)
    }
}

/// Resource consumption reported by a handler (provider credits, tokens,
/// rendered frames...). Aggregated by the statistics module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub units: u64,
    pub memory_used_bytes: Option<u64>,
    #[serde(default)]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl ResourceUsage {
    pub fn units(units: u64) -> Self {
        Self {
            units,
            ..Self::default()
        }
    }
}

/// Get a required field from an object input
pub fn require_field<'a>(
    input: &'a serde_json::Value,
    field: &str,
) -> Result<&'a serde_json::Value, SkillError> {
    input
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| SkillError::missing_input(field))
}

/// Get a required string field from an object input
pub fn require_str<'a>(input: &'a serde_json::Value, field: &str) -> Result<&'a str, SkillError> {
    require_field(input, field)?.as_str().ok_or_else(|| {
        SkillError::Validation(format!("input '{}' must be a string", field))
    })
}

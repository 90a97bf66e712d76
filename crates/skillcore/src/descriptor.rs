use crate::skill::Skill;
use crate::SkillError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Everything the registry knows about a skill, including its handler.
#[derive(Clone)]
pub struct SkillDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub active: bool,
    pub input_schema: Value,
    pub output_schema: Value,
    pub handler: Arc<dyn Skill>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Whether a timed-out attempt may be retried. An attempt that timed out
    /// may or may not have completed its side effects.
    pub idempotent: bool,
    /// Maximum concurrent invocations, for skills backed by rate-limited
    /// providers.
    pub concurrency_limit: Option<usize>,
}

impl SkillDescriptor {
    pub fn new(id: impl Into<String>, handler: Arc<dyn Skill>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            category: "general".to_string(),
            active: true,
            input_schema: Value::Null,
            output_schema: Value::Null,
            handler,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            idempotent: false,
            concurrency_limit: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// True when both descriptors point at the same handler instance.
    pub fn same_handler(&self, other: &SkillDescriptor) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.handler) as *const (),
            Arc::as_ptr(&other.handler) as *const (),
        )
    }

    /// Check `input` against the declared input schema.
    ///
    /// Only the structural subset used by skill manifests is enforced:
    /// top-level `type`, `required` and per-property `type`.
    pub fn validate_input(&self, input: &Value) -> Result<(), SkillError> {
        check_schema(&self.input_schema, input)
    }

    pub fn info(&self) -> SkillInfo {
        SkillInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            active: self.active,
            timeout_ms: self.timeout.as_millis() as u64,
            max_retries: self.retry.max_retries,
            idempotent: self.idempotent,
            concurrency_limit: self.concurrency_limit,
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
        }
    }
}

impl fmt::Debug for SkillDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillDescriptor")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("active", &self.active)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("idempotent", &self.idempotent)
            .field("concurrency_limit", &self.concurrency_limit)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a descriptor for discovery listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub active: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub idempotent: bool,
    pub concurrency_limit: Option<usize>,
    pub input_schema: Value,
    pub output_schema: Value,
}

/// Retry policy for skill execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::default(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::default(),
        }
    }
}

/// Exponential backoff between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Randomize each delay within [delay/2, delay].
    pub jitter: bool,
}

impl Backoff {
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            initial_delay_ms: delay_ms,
            multiplier: 1.0,
            max_delay_ms: delay_ms,
            jitter: false,
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

fn check_schema(schema: &Value, input: &Value) -> Result<(), SkillError> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !matches_type(expected, input) {
            return Err(SkillError::Validation(format!(
                "input must be of type {}, got {}",
                expected,
                type_name(input)
            )));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            match input.get(field) {
                Some(v) if !v.is_null() => {}
                _ => return Err(SkillError::missing_input(field)),
            }
        }
    }

    if let (Some(properties), Some(fields)) = (
        schema.get("properties").and_then(Value::as_object),
        input.as_object(),
    ) {
        for (name, value) in fields {
            let declared = properties
                .get(name)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            if let Some(expected) = declared {
                if !value.is_null() && !matches_type(expected, value) {
                    return Err(SkillError::Validation(format!(
                        "input '{}' must be of type {}, got {}",
                        name,
                        expected,
                        type_name(value)
                    )));
                }
            }
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

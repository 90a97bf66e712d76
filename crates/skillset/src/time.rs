use async_trait::async_trait;
use serde_json::{json, Value};
use skillcore::{Skill, SkillContext, SkillDescriptor, SkillError, SkillOutput};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::sleep;

const DEFAULT_DELAY_MS: u64 = 1_000;

/// Waits `delay_ms`, then passes `value` through.
///
/// Stops early when the attempt is cancelled.
pub struct DelaySkill;

#[async_trait]
impl Skill for DelaySkill {
    async fn invoke(&self, input: Value, ctx: SkillContext) -> Result<SkillOutput, SkillError> {
        let delay_ms = match input.get("delay_ms") {
            None | Some(Value::Null) => DEFAULT_DELAY_MS,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| SkillError::validation("delay_ms must be a non-negative integer"))?,
        };

        ctx.events.info(format!("Delaying for {}ms", delay_ms));
        ctx.until_cancelled(sleep(Duration::from_millis(delay_ms)))
            .await?;

        Ok(SkillOutput::new(json!({
            "delayed_ms": delay_ms,
            "value": input.get("value").cloned().unwrap_or(Value::Null),
        })))
    }
}

pub(crate) fn descriptor() -> SkillDescriptor {
    static HANDLER: OnceLock<Arc<dyn Skill>> = OnceLock::new();
    SkillDescriptor::new("time.delay", HANDLER.get_or_init(|| Arc::new(DelaySkill)).clone())
        .with_name("Delay")
        .with_description("Wait for the given number of milliseconds")
        .with_category("time")
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "delay_ms": {"type": "integer"}
            }
        }))
        .with_timeout(Duration::from_secs(3_600))
        .idempotent(true)
}

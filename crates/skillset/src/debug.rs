use async_trait::async_trait;
use serde_json::{json, Value};
use skillcore::{Skill, SkillContext, SkillDescriptor, SkillError, SkillOutput};
use std::sync::{Arc, OnceLock};

/// Returns its input unchanged and reports it as progress events
pub struct EchoSkill;

#[async_trait]
impl Skill for EchoSkill {
    async fn invoke(&self, input: Value, ctx: SkillContext) -> Result<SkillOutput, SkillError> {
        let message = input
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)");
        ctx.events.info(format!("DEBUG: {}", message));

        if let Value::Object(fields) = &input {
            for (key, value) in fields {
                ctx.events.info(format!("  {}: {}", key, value));
            }
        }

        Ok(SkillOutput::new(input))
    }
}

pub(crate) fn descriptor() -> SkillDescriptor {
    static HANDLER: OnceLock<Arc<dyn Skill>> = OnceLock::new();
    SkillDescriptor::new("debug.echo", HANDLER.get_or_init(|| Arc::new(EchoSkill)).clone())
        .with_name("Echo")
        .with_description("Returns its input; logs each field for debugging")
        .with_category("debug")
        .with_output_schema(json!({"description": "the input, unchanged"}))
        .idempotent(true)
}

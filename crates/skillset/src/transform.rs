use async_trait::async_trait;
use serde_json::{json, Value};
use skillcore::{
    require_field, require_str, RetryPolicy, Skill, SkillContext, SkillDescriptor, SkillError,
    SkillOutput,
};
use std::sync::{Arc, OnceLock};

/// Parse a JSON string
pub struct JsonParseSkill;

#[async_trait]
impl Skill for JsonParseSkill {
    async fn invoke(&self, input: Value, _ctx: SkillContext) -> Result<SkillOutput, SkillError> {
        let text = require_str(&input, "json")?;
        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| SkillError::validation(format!("JSON parse error: {}", e)))?;
        Ok(SkillOutput::new(json!({ "parsed": parsed })))
    }
}

pub(crate) fn json_parse_descriptor() -> SkillDescriptor {
    static HANDLER: OnceLock<Arc<dyn Skill>> = OnceLock::new();
    SkillDescriptor::new("transform.json_parse", HANDLER.get_or_init(|| Arc::new(JsonParseSkill)).clone())
        .with_name("Parse JSON")
        .with_description("Parse a JSON string")
        .with_category("transform")
        .with_input_schema(json!({
            "type": "object",
            "required": ["json"],
            "properties": {"json": {"type": "string"}}
        }))
        .with_retry(RetryPolicy::none())
        .idempotent(true)
}

/// Serialize a value to a JSON string
pub struct JsonStringifySkill;

#[async_trait]
impl Skill for JsonStringifySkill {
    async fn invoke(&self, input: Value, _ctx: SkillContext) -> Result<SkillOutput, SkillError> {
        let value = require_field(&input, "value")?;
        let pretty = input.get("pretty").and_then(Value::as_bool).unwrap_or(false);

        let text = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| SkillError::fatal(format!("JSON stringify error: {}", e)))?;

        Ok(SkillOutput::new(json!({ "json": text })))
    }
}

pub(crate) fn json_stringify_descriptor() -> SkillDescriptor {
    static HANDLER: OnceLock<Arc<dyn Skill>> = OnceLock::new();
    SkillDescriptor::new("transform.json_stringify", HANDLER.get_or_init(|| Arc::new(JsonStringifySkill)).clone())
        .with_name("Stringify JSON")
        .with_description("Convert a value to a JSON string")
        .with_category("transform")
        .with_input_schema(json!({
            "type": "object",
            "required": ["value"],
            "properties": {"pretty": {"type": "boolean"}}
        }))
        .with_retry(RetryPolicy::none())
        .idempotent(true)
}

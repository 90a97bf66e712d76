use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use skillcore::{require_str, Skill, SkillContext, SkillDescriptor, SkillError, SkillOutput};
use std::sync::{Arc, OnceLock};

/// HTTP request skill.
///
/// Input: `url`, optional `method` (default GET), `headers` object and
/// `body` (JSON, or sent as-is when a string). Throttling, server errors and
/// connection failures are transient; other 4xx responses are rejected as
/// validation failures.
pub struct HttpRequestSkill {
    client: reqwest::Client,
}

impl HttpRequestSkill {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn build(&self, input: &Value) -> Result<reqwest::RequestBuilder, SkillError> {
        let url = require_str(input, "url")?;
        let method = input.get("method").and_then(Value::as_str).unwrap_or("GET");

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            other => {
                return Err(SkillError::validation(format!(
                    "Unsupported method: {}",
                    other
                )))
            }
        };

        if let Some(Value::Object(headers)) = input.get("headers") {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }

        request = match input.get("body") {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(body) => request.json(body),
        };
        Ok(request)
    }
}

impl Default for HttpRequestSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for HttpRequestSkill {
    async fn invoke(&self, input: Value, ctx: SkillContext) -> Result<SkillOutput, SkillError> {
        let request = self.build(&input)?.timeout(ctx.remaining());
        let method = input.get("method").and_then(Value::as_str).unwrap_or("GET");
        ctx.events.info(format!("{} {}", method, input["url"]));

        let response = ctx
            .until_cancelled(request.send())
            .await?
            .map_err(request_error)?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or_default().to_string()),
                )
            })
            .collect();
        let text = ctx
            .until_cancelled(response.text())
            .await?
            .map_err(|e| SkillError::transient(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status.as_u16()));
        classify(status, &text)?;

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(SkillOutput::new(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        })))
    }
}

/// Map a response status to the retry taxonomy.
pub(crate) fn classify(status: StatusCode, body: &str) -> Result<(), SkillError> {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(SkillError::transient(format!("HTTP {}", status.as_u16())));
    }
    if status.is_client_error() {
        let excerpt: String = body.chars().take(200).collect();
        return Err(SkillError::validation(format!(
            "HTTP {}: {}",
            status.as_u16(),
            excerpt
        )));
    }
    Ok(())
}

fn request_error(e: reqwest::Error) -> SkillError {
    if e.is_builder() {
        SkillError::validation(format!("Invalid request: {}", e))
    } else {
        SkillError::transient(format!("HTTP request failed: {}", e))
    }
}

pub(crate) fn descriptor() -> SkillDescriptor {
    static HANDLER: OnceLock<Arc<dyn Skill>> = OnceLock::new();
    SkillDescriptor::new("http.request", HANDLER.get_or_init(|| Arc::new(HttpRequestSkill::new())).clone())
        .with_name("HTTP request")
        .with_description("Make an HTTP request")
        .with_category("http")
        .with_input_schema(json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": {"type": "string"},
                "method": {"type": "string"},
                "headers": {"type": "object"}
            }
        }))
        .with_output_schema(json!({
            "type": "object",
            "properties": {
                "status": {"type": "integer"},
                "headers": {"type": "object"},
                "body": {}
            }
        }))
}

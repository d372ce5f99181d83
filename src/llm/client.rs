//! OpenAI chat client constrained to JSON-schema output.
//!
//! The first attempt uses the structured `json_schema` response format; if
//! the model returns something that fails to parse or validate, one fallback
//! attempt runs in plain `json_object` mode with a stricter system prompt.
//! Validation happens here so agent code only ever sees conforming values.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::error::{PrismError, PrismResult};
use crate::llm::model_selector::{LlmTask, ModelSelector};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// A named JSON Schema the model output must validate against.
#[derive(Debug, Clone)]
pub struct JsonSchemaSpec {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

impl JsonSchemaSpec {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            strict: true,
        }
    }
}

/// A validated JSON result plus the provider's token usage block.
#[derive(Debug, Clone)]
pub struct LlmJson {
    pub data: Value,
    pub usage: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    response_format: Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[derive(Debug)]
pub struct LlmClient {
    client: reqwest::Client,
    api_key: String,
    selector: ModelSelector,
    base_url: String,
}

impl LlmClient {
    pub fn new(api_key: String, selector: ModelSelector) -> PrismResult<Self> {
        if api_key.is_empty() {
            return Err(PrismError::Configuration(
                "OPENAI_API_KEY is not set".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_key,
            selector,
            base_url: OPENAI_CHAT_URL.to_string(),
        })
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    /// Generate a JSON object conforming to `schema` for the given task.
    pub async fn generate_json(
        &self,
        task: LlmTask,
        system: &str,
        user: &str,
        schema: &JsonSchemaSpec,
        max_output_tokens: u32,
    ) -> PrismResult<LlmJson> {
        let schema_format = json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name,
                "schema": schema.schema,
                "strict": schema.strict,
            }
        });

        match self
            .call(task, system, user, schema, schema_format, max_output_tokens)
            .await
        {
            Ok(result) => Ok(result),
            Err(PrismError::Validation { .. }) => {
                // Some models do not reliably escape newlines in schema mode.
                let fallback_system = format!(
                    "{system}\n\nReturn a single JSON object only. Ensure all strings use valid JSON escaping (e.g. \\n)."
                );
                self.call(
                    task,
                    &fallback_system,
                    user,
                    schema,
                    json!({"type": "json_object"}),
                    max_output_tokens,
                )
                .await
            }
            Err(other) => Err(other),
        }
    }

    async fn call(
        &self,
        task: LlmTask,
        system: &str,
        user: &str,
        schema: &JsonSchemaSpec,
        response_format: Value,
        max_output_tokens: u32,
    ) -> PrismResult<LlmJson> {
        let request = ChatRequest {
            model: self.selector.model_for(task).to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: Some(max_output_tokens),
            temperature: Some(0.1),
            response_format,
        };

        debug!(task = task.as_str(), model = %request.model, "dispatching chat request");
        let response = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!(task = task.as_str(), %status, "chat request failed");
            if let Ok(parsed) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(match parsed.error.error_type.as_deref() {
                    Some("insufficient_quota") | Some("rate_limit_exceeded") => {
                        PrismError::RateLimit(parsed.error.message)
                    }
                    Some("invalid_api_key") | Some("invalid_organization") => {
                        PrismError::Configuration(parsed.error.message)
                    }
                    _ => PrismError::UpstreamSemantic(parsed.error.message),
                });
            }
            let excerpt: String = body.chars().take(500).collect();
            return Err(PrismError::UpstreamSemantic(format!(
                "HTTP {status} - {excerpt}"
            )));
        }

        let chat: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            PrismError::UpstreamSemantic(format!("unparseable chat response: {e}"))
        })?;
        let content = chat
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(PrismError::UpstreamSemantic(
                "chat response had no content".to_string(),
            ));
        }
        if let Some(usage) = &chat.usage {
            info!(
                task = task.as_str(),
                tokens = usage.get("total_tokens").and_then(serde_json::Value::as_u64).unwrap_or(0),
                "chat response received"
            );
        }

        let data = parse_and_validate(task, content, schema)?;
        Ok(LlmJson {
            data,
            usage: chat.usage,
        })
    }
}

/// Strip markdown fences the model sometimes wraps JSON in, parse, and
/// validate against the schema.
fn parse_and_validate(task: LlmTask, content: &str, schema: &JsonSchemaSpec) -> PrismResult<Value> {
    let cleaned = clean_json_response(content);
    let data: Value = serde_json::from_str(&cleaned).map_err(|e| PrismError::Validation {
        stage: task.as_str().to_string(),
        message: format!("output is not valid JSON: {e}"),
    })?;
    let validator = jsonschema::validator_for(&schema.schema).map_err(|e| {
        PrismError::Configuration(format!("invalid schema {}: {e}", schema.name))
    })?;
    if let Err(err) = validator.validate(&data) {
        return Err(PrismError::Validation {
            stage: task.as_str().to_string(),
            message: format!("schema {}: {err}", schema.name),
        });
    }
    Ok(data)
}

fn clean_json_response(content: &str) -> String {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> JsonSchemaSpec {
        JsonSchemaSpec::new(
            "test_output",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "answer": {"type": "string"},
                    "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                },
                "required": ["answer", "confidence"]
            }),
        )
    }

    #[test]
    fn clean_strips_markdown_fences() {
        assert_eq!(clean_json_response("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(clean_json_response("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn validation_accepts_conforming_output() {
        let data =
            parse_and_validate(LlmTask::Judge, r#"{"answer":"ok","confidence":0.5}"#, &schema())
                .unwrap();
        assert_eq!(data["answer"], "ok");
    }

    #[test]
    fn validation_rejects_missing_keys_and_bad_types() {
        let missing = parse_and_validate(LlmTask::Judge, r#"{"answer":"ok"}"#, &schema());
        assert!(matches!(missing, Err(PrismError::Validation { .. })));
        let bad_type = parse_and_validate(
            LlmTask::Judge,
            r#"{"answer":"ok","confidence":"high"}"#,
            &schema(),
        );
        assert!(matches!(bad_type, Err(PrismError::Validation { .. })));
    }

    #[test]
    fn empty_key_is_configuration_error() {
        let err = LlmClient::new(String::new(), ModelSelector::default()).unwrap_err();
        assert!(matches!(err, PrismError::Configuration(_)));
    }
}

//! Anthropic Messages API provider.
//!
//! Structured output is obtained by declaring a single tool whose
//! `input_schema` is the response schema and forcing the model to call it.
//! The tool input becomes the response's structured payload.

use crate::brain::LlmProvider;
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::types::{ChatMessage, CompletionRequest, CompletionResponse, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Default base URL for the Anthropic API.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// The Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl AnthropicProvider {
    /// Create a new provider, resolving the API key from configuration.
    pub fn new(model: &str, config: &ModelConfig) -> Result<Self, LlmError> {
        let api_key = config
            .resolve_api_key()
            .map_err(|e| LlmError::AuthFailed {
                provider: format!("Anthropic: {}", e),
            })?;
        Self::new_with_key(model, config, api_key)
    }

    /// Create a new provider with an explicitly provided API key.
    pub fn new_with_key(
        model: &str,
        config: &ModelConfig,
        api_key: String,
    ) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: model.to_string(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Split system turns out of the conversation; Anthropic takes them as a top-level field.
    fn extract_system_message(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
        let system_parts: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let rest = messages.iter().filter(|m| m.role != Role::System).collect();
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, rest)
    }

    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let max_tokens = request.max_tokens.unwrap_or(1024);

        let (system_text, conversation) = Self::extract_system_message(&request.messages);

        let messages_json: Vec<Value> = conversation
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": request.temperature,
            "messages": messages_json,
        });

        if let Some(system) = system_text {
            body["system"] = Value::String(system);
        }

        if let Some(schema) = &request.response_schema {
            body["tools"] = json!([{
                "name": schema.name,
                "description": schema.description,
                "input_schema": schema.schema,
            }]);
            body["tool_choice"] = json!({ "type": "tool", "name": schema.name });
        }

        body
    }

    /// Parse a Messages API response.
    ///
    /// Text blocks are concatenated; the first `tool_use` block's input becomes
    /// the structured payload.
    fn parse_response(body: &Value) -> Result<CompletionResponse, LlmError> {
        let model = body["model"].as_str().unwrap_or("unknown").to_string();
        let finish_reason = body["stop_reason"].as_str().map(|s| s.to_string());

        let usage = TokenUsage {
            input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
            output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
        };

        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'content' array in response".to_string(),
            })?;

        let mut text = String::new();
        let mut structured = None;
        for block in blocks {
            match block["type"].as_str().unwrap_or("text") {
                "text" => text.push_str(block["text"].as_str().unwrap_or("")),
                "tool_use" => {
                    if structured.is_none() {
                        structured = Some(block["input"].clone());
                    }
                }
                other => {
                    debug!(block_type = other, "Ignoring unknown content block type");
                }
            }
        }

        Ok(CompletionResponse {
            text,
            structured,
            usage,
            model,
            finish_reason,
        })
    }

    /// Map an HTTP status code to the appropriate `LlmError`.
    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 => LlmError::AuthFailed {
                provider: "Anthropic".to_string(),
            },
            429 => {
                let retry_after = serde_json::from_str::<Value>(body_text)
                    .ok()
                    .and_then(|v| v["error"]["retry_after_secs"].as_u64())
                    .unwrap_or(30);
                LlmError::RateLimited {
                    retry_after_secs: retry_after,
                }
            }
            _ => LlmError::ApiRequest {
                message: format!("HTTP {} from Anthropic API: {}", status, body_text),
            },
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request_body(&request);
        let url = format!("{}/messages", self.base_url);

        debug!(
            model = self.model.as_str(),
            url = url.as_str(),
            "Sending Anthropic completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(e, self.timeout_secs))?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ResponseParse {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON in response: {}", e),
            })?;

        Self::parse_response(&response_json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseSchema;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new_with_key(
            "claude-sonnet-4-20250514",
            &ModelConfig::default(),
            "test-key".into(),
        )
        .unwrap()
    }

    #[test]
    fn test_build_body_forces_tool() {
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system("You type ontology terms."),
                ChatMessage::user("{'id': 'M7', 'term': 'alloy'}"),
            ],
            max_tokens: Some(300),
            response_schema: Some(ResponseSchema::term_typing()),
            ..Default::default()
        };
        let body = provider().build_request_body(&request);

        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 300);
        assert_eq!(body["system"], "You type ontology terms.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["tools"][0]["name"], "TermTyping");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(
            body["tool_choice"],
            json!({"type": "tool", "name": "TermTyping"})
        );
    }

    #[test]
    fn test_build_body_without_schema_or_system() {
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let body = provider().build_request_body(&request);
        assert!(body.get("system").is_none());
        assert!(body.get("tools").is_none());
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn test_parse_response_tool_use() {
        let body = json!({
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
            "content": [
                {"type": "tool_use", "id": "toolu_1", "name": "TermTyping",
                 "input": {"id": "M7", "types": ["Material"], "reason": "an alloy is a material"}}
            ],
            "usage": {"input_tokens": 410, "output_tokens": 42}
        });
        let resp = AnthropicProvider::parse_response(&body).unwrap();
        let structured = resp.structured.unwrap();
        assert_eq!(structured["id"], "M7");
        assert_eq!(structured["types"][0], "Material");
        assert_eq!(resp.usage.input_tokens, 410);
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn test_parse_response_text_only() {
        let body = json!({
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " there"}],
            "usage": {"input_tokens": 1, "output_tokens": 2}
        });
        let resp = AnthropicProvider::parse_response(&body).unwrap();
        assert_eq!(resp.text, "Hello there");
        assert!(resp.structured.is_none());
    }

    #[test]
    fn test_parse_response_missing_content() {
        let body = json!({"model": "x"});
        assert!(matches!(
            AnthropicProvider::parse_response(&body),
            Err(LlmError::ResponseParse { .. })
        ));
    }

    #[test]
    fn test_map_http_error() {
        assert!(matches!(
            AnthropicProvider::map_http_error(reqwest::StatusCode::UNAUTHORIZED, ""),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            AnthropicProvider::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "{}"),
            LlmError::RateLimited {
                retry_after_secs: 30
            }
        ));
        assert!(matches!(
            AnthropicProvider::map_http_error(reqwest::StatusCode::BAD_REQUEST, "bad"),
            LlmError::ApiRequest { .. }
        ));
    }
}

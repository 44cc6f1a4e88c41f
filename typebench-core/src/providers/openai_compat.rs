//! OpenAI-compatible LLM provider.
//!
//! Supports OpenAI, DeepSeek, and any endpoint that follows the OpenAI chat
//! completions API format. Structured output is requested through
//! `response_format`, either as a strict `json_schema` or as plain
//! `json_object` with the schema described in the system turn.

use crate::brain::LlmProvider;
use crate::config::{JsonMode, ModelConfig};
use crate::error::LlmError;
use crate::types::{ChatMessage, CompletionRequest, CompletionResponse, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible LLM provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    json_mode: JsonMode,
    timeout_secs: u64,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider from configuration.
    ///
    /// Reads the API key from the environment variable specified in `config.api_key_env`.
    pub fn new(model: &str, config: &ModelConfig) -> Result<Self, LlmError> {
        let api_key = config
            .resolve_api_key()
            .map_err(|e| LlmError::AuthFailed {
                provider: format!("OpenAI-compatible: {}", e),
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
            json_mode: config.json_mode,
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Convert messages to OpenAI JSON format.
    fn messages_to_json(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content,
                })
            })
            .collect()
    }

    /// Build the request body.
    ///
    /// In `json_object` mode the schema cannot be sent as a constraint, so it is
    /// appended to the system turn instead (a system turn is added if none exists).
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let mut messages = request.messages.clone();

        if let (JsonMode::Object, Some(schema)) = (self.json_mode, &request.response_schema) {
            let note = format!(
                "Respond with a single JSON object matching this schema:\n{}",
                schema.schema
            );
            match messages.iter_mut().find(|m| m.role == Role::System) {
                Some(system) => {
                    system.content.push_str("\n\n");
                    system.content.push_str(&note);
                }
                None => messages.insert(0, ChatMessage::system(note)),
            }
        }

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": Self::messages_to_json(&messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if let Some(schema) = &request.response_schema {
            body["response_format"] = match self.json_mode {
                JsonMode::Schema => json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": schema.name,
                        "description": schema.description,
                        "schema": schema.strict_schema(),
                        "strict": true,
                    }
                }),
                JsonMode::Object => json!({ "type": "json_object" }),
            };
        }

        body
    }

    /// Parse an OpenAI chat completion response.
    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, LlmError> {
        let choice =
            body.get("choices")
                .and_then(|c| c.get(0))
                .ok_or_else(|| LlmError::ResponseParse {
                    message: "No choices in response".to_string(),
                })?;

        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        if let Some(refusal) = message.get("refusal").and_then(|r| r.as_str())
            && !refusal.is_empty()
        {
            return Err(LlmError::InvalidPrediction {
                message: format!("Model refused: {}", refusal),
            });
        }

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(|s| s.to_string());

        let usage = body
            .get("usage")
            .map(|u| TokenUsage {
                input_tokens: u
                    .get("prompt_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize,
                output_tokens: u
                    .get("completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize,
            })
            .unwrap_or_default();

        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string();

        Ok(CompletionResponse {
            text,
            structured: None,
            usage,
            model,
            finish_reason,
        })
    }

    /// Map HTTP error status codes to LlmError variants.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 => {
                debug!(body = %body, "Authentication failed (401)");
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        // "Rate limit reached ... Please try again in 20s."
                        msg.split("in ").last().and_then(|s| {
                            s.trim_end_matches('.')
                                .trim_end_matches('s')
                                .parse::<u64>()
                                .ok()
                        })
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        debug!(url = %url, model = %self.model, "Sending OpenAI completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(e, self.timeout_secs))?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        Self::parse_response(&json, &self.model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseSchema;

    fn provider(json_mode: JsonMode) -> OpenAiCompatibleProvider {
        let config = ModelConfig {
            json_mode,
            base_url: Some("https://api.deepseek.com/".to_string()),
            ..ModelConfig::default()
        };
        OpenAiCompatibleProvider::new_with_key("deepseek-chat", &config, "sk-test".into()).unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![
                ChatMessage::system("Assign a type."),
                ChatMessage::user("{'id': 'T1', 'term': 'rain'}"),
            ],
            temperature: 0.0,
            max_tokens: Some(300),
            response_schema: Some(ResponseSchema::term_typing()),
            model: None,
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(provider(JsonMode::Object).base_url, "https://api.deepseek.com");
    }

    #[test]
    fn test_default_base_url() {
        let p = OpenAiCompatibleProvider::new_with_key("gpt-4o", &ModelConfig::default(), "k".into())
            .unwrap();
        assert_eq!(p.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_build_body_json_schema_mode() {
        let body = provider(JsonMode::Schema).build_request_body(&request());
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["max_tokens"], 300);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "TermTyping");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(
            body["response_format"]["json_schema"]["schema"]["additionalProperties"],
            false
        );
        // System turn untouched.
        assert_eq!(body["messages"][0]["content"], "Assign a type.");
    }

    #[test]
    fn test_build_body_json_object_mode_describes_schema() {
        let body = provider(JsonMode::Object).build_request_body(&request());
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.starts_with("Assign a type.\n\n"));
        assert!(system.contains("\"reason\""));
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_build_body_json_object_mode_without_system_turn() {
        let mut req = request();
        req.messages.remove(0);
        let body = provider(JsonMode::Object).build_request_body(&req);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_build_body_without_schema() {
        let mut req = request();
        req.response_schema = None;
        let body = provider(JsonMode::Schema).build_request_body(&req);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_parse_response() {
        let body = json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "{\"id\":\"T1\",\"types\":[\"Process\"],\"reason\":\"weather\"}"
                },
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 18}
        });
        let resp = OpenAiCompatibleProvider::parse_response(&body, "gpt-4o").unwrap();
        assert!(resp.text.contains("\"T1\""));
        assert_eq!(resp.model, "gpt-4o-2024-08-06");
        assert_eq!(resp.usage.input_tokens, 120);
        assert_eq!(resp.usage.output_tokens, 18);
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_response_no_choices() {
        let body = json!({"choices": []});
        assert!(matches!(
            OpenAiCompatibleProvider::parse_response(&body, "gpt-4o"),
            Err(LlmError::ResponseParse { .. })
        ));
    }

    #[test]
    fn test_parse_response_refusal() {
        let body = json!({
            "choices": [{"message": {"content": null, "refusal": "I can't help"}}]
        });
        assert!(matches!(
            OpenAiCompatibleProvider::parse_response(&body, "gpt-4o"),
            Err(LlmError::InvalidPrediction { .. })
        ));
    }

    #[test]
    fn test_map_http_error_auth() {
        let err =
            OpenAiCompatibleProvider::map_http_error(reqwest::StatusCode::UNAUTHORIZED, "{}");
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }

    #[test]
    fn test_map_http_error_rate_limit_parses_delay() {
        let body = r#"{"error":{"message":"Rate limit reached. Please try again in 20s"}}"#;
        let err =
            OpenAiCompatibleProvider::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, body);
        assert!(matches!(
            err,
            LlmError::RateLimited {
                retry_after_secs: 20
            }
        ));
    }

    #[test]
    fn test_map_http_error_rate_limit_default() {
        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "not json",
        );
        assert!(matches!(
            err,
            LlmError::RateLimited {
                retry_after_secs: 5
            }
        ));
    }

    #[test]
    fn test_map_http_error_server() {
        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::BAD_GATEWAY,
            "upstream",
        );
        match err {
            LlmError::ApiRequest { message } => assert!(message.contains("Server error")),
            other => panic!("unexpected {:?}", other),
        }
    }
}

//! Google Gemini `generateContent` provider.
//!
//! Key differences from the OpenAI wire format:
//! - Authentication via `?key=` query parameter
//! - System instruction is a top-level `system_instruction` field
//! - Assistant turns use the `model` role
//! - Structured output via `generationConfig.responseMimeType` and
//!   `responseSchema`, an OpenAPI subset with upper-case type names

use crate::brain::LlmProvider;
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::types::{ChatMessage, CompletionRequest, CompletionResponse, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini provider.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl GeminiProvider {
    /// Create a new provider, resolving the API key from configuration.
    pub fn new(model: &str, config: &ModelConfig) -> Result<Self, LlmError> {
        let api_key = config
            .resolve_api_key()
            .map_err(|e| LlmError::AuthFailed {
                provider: format!("Gemini: {}", e),
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

    fn extract_system_instruction(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
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

    /// Convert a JSON schema into Gemini's schema dialect.
    ///
    /// Type names are upper-cased and `additionalProperties` is dropped, since
    /// the API rejects it.
    fn to_gemini_schema(schema: &Value) -> Value {
        match schema {
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, value) in map {
                    match (key.as_str(), value) {
                        ("additionalProperties", _) => {}
                        ("type", Value::String(t)) => {
                            out.insert(key.clone(), Value::String(t.to_uppercase()));
                        }
                        ("properties", Value::Object(props)) => {
                            let converted = props
                                .iter()
                                .map(|(name, prop)| (name.clone(), Self::to_gemini_schema(prop)))
                                .collect();
                            out.insert(key.clone(), Value::Object(converted));
                        }
                        ("items", item) => {
                            out.insert(key.clone(), Self::to_gemini_schema(item));
                        }
                        _ => {
                            out.insert(key.clone(), value.clone());
                        }
                    }
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let (system_text, conversation) = Self::extract_system_instruction(&request.messages);

        let contents: Vec<Value> = conversation
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({ "role": role, "parts": [{ "text": msg.content }] })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
            },
        });

        // Thinking tokens count against this cap.
        if let Some(max_tokens) = request.max_tokens {
            body["generationConfig"]["maxOutputTokens"] = json!(max_tokens);
        }

        if let Some(system) = &system_text {
            body["system_instruction"] = json!({
                "parts": [{"text": system}]
            });
        }

        if let Some(schema) = &request.response_schema {
            body["generationConfig"]["responseMimeType"] = json!("application/json");
            body["generationConfig"]["responseSchema"] = Self::to_gemini_schema(&schema.schema);
        }

        body
    }

    fn parse_response(body: &Value) -> Result<CompletionResponse, LlmError> {
        let candidates = body["candidates"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'candidates' array in response".to_string(),
            })?;

        let candidate = candidates.first().ok_or_else(|| LlmError::ResponseParse {
            message: "Empty 'candidates' array in response".to_string(),
        })?;

        let finish_reason = candidate["finishReason"].as_str().map(|s| s.to_string());

        let parts = candidate["content"]["parts"].as_array().ok_or_else(|| {
            LlmError::ResponseParse {
                message: format!(
                    "Missing 'parts' array in candidate content (finishReason: {})",
                    finish_reason.as_deref().unwrap_or("none")
                ),
            }
        })?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();

        let usage_metadata = &body["usageMetadata"];
        let usage = TokenUsage {
            input_tokens: usage_metadata["promptTokenCount"].as_u64().unwrap_or(0) as usize,
            output_tokens: usage_metadata["candidatesTokenCount"].as_u64().unwrap_or(0) as usize,
        };

        let model = body["modelVersion"]
            .as_str()
            .unwrap_or("gemini")
            .to_string();

        Ok(CompletionResponse {
            text,
            structured: None,
            usage,
            model,
            finish_reason,
        })
    }

    /// Map an HTTP status code to the appropriate `LlmError`.
    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 30,
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
        }
    }

    fn endpoint_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        )
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model).to_string();
        let body = self.build_request_body(&request);
        let url = self.endpoint_url(&model);

        debug!(model = %model, "Sending Gemini completion request");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_transport(e.without_url(), self.timeout_secs))?;

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
        "gemini"
    }
}

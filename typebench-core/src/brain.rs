//! The provider seam: a trait every LLM adapter implements, plus a mock for tests.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, TokenUsage};
use async_trait::async_trait;
use std::sync::Mutex;

/// An LLM backend reachable over HTTP.
///
/// Adapters translate a [`CompletionRequest`] into their wire format and map
/// the answer back; they know nothing about datasets or predictions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Short provider identifier used in logs and error messages.
    fn provider_name(&self) -> &str;

    /// Whether the provider can be forced to emit schema-conforming output.
    fn supports_structured_output(&self) -> bool {
        true
    }
}

/// A scripted provider for tests: returns queued results in order.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.lock_responses().push(Ok(response));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.lock_responses().push(Err(error));
    }

    /// Create a plain-text response.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            structured: None,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Create a response carrying a structured payload, like a forced tool call.
    pub fn structured_response(value: serde_json::Value) -> CompletionResponse {
        CompletionResponse {
            text: String::new(),
            structured: Some(value),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("tool_use".to_string()),
        }
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, Vec<Result<CompletionResponse, LlmError>>> {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
        let mut responses = self.lock_responses();
        if responses.is_empty() {
            Err(LlmError::ApiRequest {
                message: "mock provider has no queued responses".to_string(),
            })
        } else {
            responses.remove(0)
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[tokio::test]
    async fn test_mock_returns_queued_in_order() {
        let mock = MockLlmProvider::new();
        mock.queue_response(MockLlmProvider::text_response("first"));
        mock.queue_error(LlmError::RateLimited {
            retry_after_secs: 3,
        });

        let first = mock.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(first.text, "first");

        let second = mock.complete(CompletionRequest::default()).await;
        assert!(matches!(
            second,
            Err(LlmError::RateLimited {
                retry_after_secs: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_mock_empty_queue_is_an_error() {
        let mock = MockLlmProvider::default();
        assert!(mock.complete(CompletionRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let mock = MockLlmProvider::new();
        mock.queue_response(MockLlmProvider::structured_response(
            serde_json::json!({"id": "a"}),
        ));
        let request = CompletionRequest {
            messages: vec![ChatMessage::user("hello")],
            ..Default::default()
        };
        mock.complete(request).await.unwrap();

        let seen = mock.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].messages[0].content, "hello");
        assert_eq!(mock.provider_name(), "mock");
        assert_eq!(mock.model_name(), "mock-model");
    }
}

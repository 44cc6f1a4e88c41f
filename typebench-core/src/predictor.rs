//! Turning a request item into a typed [`Prediction`].
//!
//! The dispatcher only sees the [`Predictor`] capability. The production
//! implementation, [`TermTypingPredictor`], asks a provider for schema-constrained
//! output and validates what comes back.

use crate::brain::LlmProvider;
use crate::config::ModelConfig;
use crate::error::LlmError;
use crate::types::{CompletionRequest, Prediction, RequestItem, ResponseSchema, TokenUsage};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Anything that can produce a prediction for one request item.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, item: &RequestItem) -> Result<Prediction, LlmError>;
}

/// Predictor backed by an [`LlmProvider`] with structured output.
pub struct TermTypingPredictor {
    provider: Arc<dyn LlmProvider>,
    schema: ResponseSchema,
    temperature: f32,
    max_tokens: Option<usize>,
    usage: Mutex<TokenUsage>,
}

impl TermTypingPredictor {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &ModelConfig) -> Self {
        Self {
            provider,
            schema: ResponseSchema::term_typing(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Total token usage across all completed calls.
    pub fn usage(&self) -> TokenUsage {
        *self
            .usage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }
}

#[async_trait]
impl Predictor for TermTypingPredictor {
    async fn predict(&self, item: &RequestItem) -> Result<Prediction, LlmError> {
        let request = CompletionRequest {
            messages: item.messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_schema: Some(self.schema.clone()),
            model: None,
        };

        let response = self.provider.complete(request).await?;
        self.usage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .accumulate(&response.usage);

        let value = match response.structured {
            Some(value) => value,
            None => extract_json_from_text(&response.text).ok_or_else(|| {
                LlmError::ResponseParse {
                    message: format!(
                        "no JSON object in {} output (finish_reason: {})",
                        self.provider.provider_name(),
                        response.finish_reason.as_deref().unwrap_or("none")
                    ),
                }
            })?,
        };

        debug!(model = self.provider.model_name(), "Decoded structured output");
        validate_prediction(value, item.id.as_deref())
    }
}

/// Recover a JSON value from model text output.
///
/// Tries, in order: the whole text, the outermost `{...}` slice, a ```` ```json ````
/// fence, and any ```` ``` ```` fence.
pub fn extract_json_from_text(s: &str) -> Option<Value> {
    let t = s.trim().trim_matches('\u{feff}');

    if let Ok(v) = serde_json::from_str::<Value>(t) {
        return Some(v);
    }

    if let (Some(i), Some(j)) = (t.find('{'), t.rfind('}'))
        && i < j
        && let Ok(v) = serde_json::from_str::<Value>(&t[i..=j])
    {
        return Some(v);
    }

    for fence in ["```json", "```"] {
        if let Some(start) = t.find(fence) {
            let body_start = start + fence.len();
            if let Some(end) = t[body_start..].find("```")
                && let Ok(v) = serde_json::from_str::<Value>(&t[body_start..body_start + end])
            {
                return Some(v);
            }
        }
    }

    None
}

/// Coerce a decoded JSON value into a [`Prediction`] for the item `expected_id`.
///
/// A JSON string holding an encoded object is decoded once more, a
/// single-element array is unwrapped, and a bare string in `types` is wrapped
/// into a list. An empty id is rejected; a
/// mismatching id is replaced by the item's id.
pub fn validate_prediction(value: Value, expected_id: Option<&str>) -> Result<Prediction, LlmError> {
    let mut value = match value {
        Value::String(inner) => {
            serde_json::from_str(&inner).map_err(|e| LlmError::InvalidPrediction {
                message: format!("string payload is not JSON: {}", e),
            })?
        }
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    };

    if let Some(types) = value.get_mut("types")
        && types.is_string()
    {
        let single = types.take();
        *types = Value::Array(vec![single]);
    }

    let mut prediction: Prediction =
        serde_json::from_value(value).map_err(|e| LlmError::InvalidPrediction {
            message: e.to_string(),
        })?;

    prediction.id = prediction.id.trim().to_string();
    if prediction.id.is_empty() {
        return Err(LlmError::InvalidPrediction {
            message: "prediction has an empty id".to_string(),
        });
    }

    if let Some(expected) = expected_id
        && prediction.id != expected
    {
        warn!(
            expected = expected,
            returned = %prediction.id,
            "Prediction id does not match request item; using the item id"
        );
        prediction.id = expected.to_string();
    }

    prediction.types = prediction
        .types
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if prediction.types.is_empty() {
        warn!(id = %prediction.id, "Prediction has no types");
    }

    Ok(prediction)
}

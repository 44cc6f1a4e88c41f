//! LLM provider implementations.
//!
//! Provides concrete implementations of the `LlmProvider` trait for:
//! - OpenAI-compatible APIs (OpenAI, DeepSeek, vLLM, Ollama)
//! - Anthropic Messages API (Claude models)
//! - Google Gemini API (Gemini models)
//!
//! Use `create_provider()` to instantiate the appropriate provider for a configured model.

pub mod anthropic;
pub mod gemini;
pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{ModelConfig, ProviderKind};
use crate::error::LlmError;
use std::sync::Arc;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatibleProvider;

/// Create the provider for `model` as described by its configuration entry.
///
/// The API key is resolved here, so a missing key fails before any dispatch starts.
pub fn create_provider(model: &str, config: &ModelConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(model, config)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(model, config)?),
        ProviderKind::OpenAi => Arc::new(OpenAiCompatibleProvider::new(model, config)?),
    };
    tracing::debug!(
        model = model,
        provider = %config.provider,
        "Created LLM provider"
    );
    Ok(provider)
}

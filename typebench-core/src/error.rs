//! Error types for the typebench core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering provider calls, dataset files, and configuration.

use std::path::PathBuf;

/// Top-level error type for the typebench core library.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors from LLM provider interactions and structured decoding.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Structured output rejected: {message}")]
    InvalidPrediction { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Unknown provider: {provider}")]
    UnknownProvider { provider: String },
}

impl LlmError {
    /// Map a transport error from `reqwest` into the matching variant.
    pub fn from_transport(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            LlmError::Timeout { timeout_secs }
        } else if err.is_connect() {
            LlmError::Connection {
                message: err.to_string(),
            }
        } else {
            LlmError::ApiRequest {
                message: err.to_string(),
            }
        }
    }
}

/// Errors from dataset, request-item and result files.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Malformed JSON in {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Malformed line {line} in {path}: {message}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Duplicate id '{id}' in {source_name}")]
    DuplicateId { id: String, source_name: String },

    #[error("Prompt file {path} has no 'prompt' field")]
    MissingPrompt { path: PathBuf },

    #[error("Unknown dataset '{name}'. Available datasets: {available}")]
    UnknownDataset { name: String, available: String },

    #[error("Unknown model '{name}'. Available models: {available}")]
    UnknownModel { name: String, available: String },

    #[error("No predictions from reasoner '{model}' at {path}")]
    MissingReasonerResults { model: String, path: PathBuf },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `BenchError`.
pub type Result<T> = std::result::Result<T, BenchError>;

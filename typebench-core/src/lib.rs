//! # typebench core
//!
//! Core library of the typebench term-typing harness.
//! Provides the LLM provider adapters, the bounded-concurrency dispatcher,
//! result collation and reconciliation, prompt building, configuration,
//! and the pipeline stages that tie them to a workspace layout.

pub mod brain;
pub mod config;
pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod predictor;
pub mod prompt;
pub mod providers;
pub mod reconcile;
pub mod results;
pub mod submit;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{BenchConfig, DispatchConfig, JsonMode, ModelConfig, PathsConfig, ProviderKind};
pub use dispatch::{DispatchProgress, DispatchReport, Dispatcher, ItemFailure, ItemOutcome};
pub use error::{BenchError, ConfigError, DatasetError, LlmError, Result};
pub use pipeline::{MissingPaths, Pipeline, RerunOutcome, RunOutcome, StageOutput};
pub use predictor::{Predictor, TermTypingPredictor};
pub use reconcile::{MissingReport, missing_ids};
pub use results::ResultSet;
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, Prediction, RequestItem, ResponseSchema,
    Role, SubmissionRecord, TermRecord, TokenUsage,
};

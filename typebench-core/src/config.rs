//! Configuration system for typebench.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/typebench/config.toml` and/or `typebench.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, DatasetError};

/// Name of the workspace-level configuration file.
pub const WORKSPACE_CONFIG_FILE: &str = "typebench.toml";

/// Top-level configuration for a benchmark workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Dataset names accepted on the command line (the "all" sentinel expands to these).
    pub datasets: Vec<String>,
    /// Directory layout, relative to `root`.
    pub paths: PathsConfig,
    /// Model table keyed by model identifier.
    pub models: BTreeMap<String, ModelConfig>,
    /// Dispatcher settings.
    pub dispatch: DispatchConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "gpt-4o".to_string(),
            ModelConfig {
                provider: ProviderKind::OpenAi,
                api_key_env: "OPEN_AI_API_KEY".to_string(),
                max_concurrent: 1,
                ..ModelConfig::default()
            },
        );
        models.insert(
            "claude-sonnet-4-20250514".to_string(),
            ModelConfig {
                provider: ProviderKind::Anthropic,
                api_key_env: "CLAUDE_API_KEY".to_string(),
                max_concurrent: 2,
                max_tokens: Some(300),
                ..ModelConfig::default()
            },
        );
        models.insert(
            "gemini-2.5-pro".to_string(),
            ModelConfig {
                provider: ProviderKind::Gemini,
                api_key_env: "GEMINI_API_KEY".to_string(),
                max_concurrent: 1,
                ..ModelConfig::default()
            },
        );
        models.insert(
            "deepseek-chat".to_string(),
            ModelConfig {
                provider: ProviderKind::OpenAi,
                api_key_env: "DEEPSEEK_API_KEY".to_string(),
                base_url: Some("https://api.deepseek.com".to_string()),
                max_concurrent: 5,
                json_mode: JsonMode::Object,
                ..ModelConfig::default()
            },
        );

        Self {
            datasets: vec!["MatOnto".to_string(), "OBI".to_string(), "SWEET".to_string()],
            paths: PathsConfig::default(),
            models,
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Which wire API a model is served through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions, and any compatible endpoint (DeepSeek, vLLM, Ollama).
    #[default]
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini `generateContent` API.
    Gemini,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Gemini => write!(f, "gemini"),
        }
    }
}

/// How an OpenAI-compatible endpoint is asked for JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonMode {
    /// `response_format: json_schema` with strict schema enforcement.
    #[default]
    Schema,
    /// `response_format: json_object`; the schema is described in the system turn.
    Object,
}

/// Per-model provider settings.
///
/// Every field has a default, so a `[models.<name>]` table only needs the
/// values that differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Wire API used for this model.
    #[serde(default)]
    pub provider: ProviderKind,
    /// Environment variable name containing the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Explicit API key (takes precedence over `api_key_env`). Never serialized.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Concurrency ceiling for this model's dispatcher runs.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Output token cap. Unset leaves the provider's own limit in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,
    /// JSON mode for OpenAI-compatible endpoints.
    #[serde(default)]
    pub json_mode: JsonMode,
    /// HTTP request timeout applied by the provider client.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_concurrent() -> usize {
    1
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            api_key_env: default_api_key_env(),
            api_key: None,
            base_url: None,
            max_concurrent: default_max_concurrent(),
            max_tokens: None,
            temperature: 0.0,
            json_mode: JsonMode::Schema,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ModelConfig {
    /// Resolve the API key: explicit key first, then the environment variable.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env).map_err(|_| ConfigError::EnvVarMissing {
            var: self.api_key_env.clone(),
        })
    }
}

/// Dispatcher settings shared by all runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Log a progress line every this many completed items (0 disables).
    pub progress_interval: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            progress_interval: 25,
        }
    }
}

/// On-disk layout of a benchmark workspace.
///
/// Every directory is relative to `root` unless given as an absolute path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub root: PathBuf,
    pub datasets_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub results_dir: PathBuf,
    pub processed_judge_dir: PathBuf,
    pub results_judge_dir: PathBuf,
    pub results_best_dir: PathBuf,
    pub need_reason_dir: PathBuf,
    pub reason_results_dir: PathBuf,
    pub reason_submit_dir: PathBuf,
    pub judge_submit_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            datasets_dir: PathBuf::from("datasets"),
            processed_dir: PathBuf::from("processed_datasets"),
            results_dir: PathBuf::from("results"),
            processed_judge_dir: PathBuf::from("processed_datasets_judge"),
            results_judge_dir: PathBuf::from("results_judge"),
            results_best_dir: PathBuf::from("results_best"),
            need_reason_dir: PathBuf::from("need_reason_data"),
            reason_results_dir: PathBuf::from("result_with_reason"),
            reason_submit_dir: PathBuf::from("result_with_reason_for_submit"),
            judge_submit_dir: PathBuf::from("results_for_submit_judge"),
        }
    }
}

impl PathsConfig {
    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.root.join(dir)
        }
    }

    /// `datasets/<Dataset>`
    pub fn dataset_dir(&self, dataset: &str) -> PathBuf {
        self.resolve(&self.datasets_dir).join(dataset)
    }

    /// `datasets/<Dataset>/prompt.json`
    pub fn prompt_file(&self, dataset: &str) -> PathBuf {
        self.dataset_dir(dataset).join("prompt.json")
    }

    /// `datasets/<Dataset>/prompt_judge.json`
    pub fn judge_prompt_file(&self, dataset: &str) -> PathBuf {
        self.dataset_dir(dataset).join("prompt_judge.json")
    }

    /// `datasets/<Dataset>/train/term_typing_train_data.json`
    pub fn train_file(&self, dataset: &str) -> PathBuf {
        self.dataset_dir(dataset)
            .join("train")
            .join("term_typing_train_data.json")
    }

    /// `datasets/<Dataset>/test/<dataset>_term_typing_test_data.json`
    pub fn test_file(&self, dataset: &str) -> PathBuf {
        self.dataset_dir(dataset).join("test").join(format!(
            "{}_term_typing_test_data.json",
            dataset.to_lowercase()
        ))
    }

    /// `processed_datasets/<model>/<dataset>_test.jsonl`
    pub fn items_file(&self, model: &str, dataset: &str) -> PathBuf {
        self.resolve(&self.processed_dir)
            .join(model)
            .join(format!("{}_test.jsonl", dataset.to_lowercase()))
    }

    /// `results/<model>/<dataset>_results.json`
    pub fn results_file(&self, model: &str, dataset: &str) -> PathBuf {
        self.resolve(&self.results_dir)
            .join(model)
            .join(format!("{}_results.json", dataset.to_lowercase()))
    }

    /// `results/<model>/<dataset>_missing_data_report.json`
    pub fn missing_report_file(&self, model: &str, dataset: &str) -> PathBuf {
        self.resolve(&self.results_dir)
            .join(model)
            .join(format!("{}_missing_data_report.json", dataset.to_lowercase()))
    }

    /// `results/<model>/<dataset>_missing_prompts.jsonl`
    pub fn missing_prompts_file(&self, model: &str, dataset: &str) -> PathBuf {
        self.resolve(&self.results_dir)
            .join(model)
            .join(format!("{}_missing_prompts.jsonl", dataset.to_lowercase()))
    }

    /// `processed_datasets_judge/<dataset>/<judge>`
    pub fn judge_items_dir(&self, dataset: &str, judge: &str) -> PathBuf {
        self.resolve(&self.processed_judge_dir)
            .join(dataset.to_lowercase())
            .join(judge)
    }

    /// `processed_datasets_judge/<dataset>/<judge>/<dataset>_<r1>_<r2>..._test.jsonl`
    pub fn judge_items_file(&self, dataset: &str, judge: &str, reasoners: &[String]) -> PathBuf {
        self.judge_items_dir(dataset, judge).join(format!(
            "{}_{}_test.jsonl",
            dataset.to_lowercase(),
            reasoners.join("_")
        ))
    }

    /// `results_judge/<judge>`
    pub fn judge_results_dir(&self, judge: &str) -> PathBuf {
        self.resolve(&self.results_judge_dir).join(judge)
    }

    /// `results_best/<model>/<dataset>.json`
    pub fn best_results_file(&self, model: &str, dataset: &str) -> PathBuf {
        self.resolve(&self.results_best_dir)
            .join(model)
            .join(format!("{}.json", dataset.to_lowercase()))
    }

    /// `need_reason_data/<model>/<dataset>.csv`
    pub fn need_reason_csv(&self, model: &str, dataset: &str) -> PathBuf {
        self.resolve(&self.need_reason_dir)
            .join(model)
            .join(format!("{}.csv", dataset.to_lowercase()))
    }

    /// `need_reason_data/<model>/<dataset>_prompt.json`
    pub fn reason_prompt_file(&self, model: &str, dataset: &str) -> PathBuf {
        self.resolve(&self.need_reason_dir)
            .join(model)
            .join(format!("{}_prompt.json", dataset.to_lowercase()))
    }

    /// `result_with_reason/<model>/<dataset>_results.json`
    pub fn reason_results_file(&self, model: &str, dataset: &str) -> PathBuf {
        self.resolve(&self.reason_results_dir)
            .join(model)
            .join(format!("{}_results.json", dataset.to_lowercase()))
    }

    /// `result_with_reason/<model>/<dataset>.json`, the curated input of the strip stage.
    pub fn reason_strip_input(&self, model: &str, dataset: &str) -> PathBuf {
        self.resolve(&self.reason_results_dir)
            .join(model)
            .join(format!("{}.json", dataset.to_lowercase()))
    }

    /// `result_with_reason_for_submit/<model>/<dataset>.json`
    pub fn reason_submit_file(&self, model: &str, dataset: &str) -> PathBuf {
        self.resolve(&self.reason_submit_dir)
            .join(model)
            .join(format!("{}.json", dataset.to_lowercase()))
    }

    /// `results_for_submit_judge/<model>`
    pub fn judge_submit_model_dir(&self, model: &str) -> PathBuf {
        self.resolve(&self.judge_submit_dir).join(model)
    }
}

impl BenchConfig {
    /// Look up a model's settings by identifier.
    pub fn model(&self, name: &str) -> Result<&ModelConfig, DatasetError> {
        self.models
            .get(name)
            .ok_or_else(|| DatasetError::UnknownModel {
                name: name.to_string(),
                available: self.model_names().join(", "),
            })
    }

    /// All configured model identifiers, sorted.
    pub fn model_names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// Expand a dataset selector into concrete dataset names.
    ///
    /// `"all"` selects every configured dataset; any other value must match a
    /// configured name (case-insensitive) and is returned in its configured spelling.
    pub fn select_datasets(&self, selector: &str) -> Result<Vec<String>, DatasetError> {
        if selector.eq_ignore_ascii_case("all") {
            return Ok(self.datasets.clone());
        }
        self.datasets
            .iter()
            .find(|d| d.eq_ignore_ascii_case(selector))
            .map(|d| vec![d.clone()])
            .ok_or_else(|| DatasetError::UnknownDataset {
                name: selector.to_string(),
                available: self.datasets.join(", "),
            })
    }

    /// Expand a model selector (`"all"` or one identifier) into model identifiers.
    pub fn select_models(&self, selector: &str) -> Result<Vec<String>, DatasetError> {
        if selector.eq_ignore_ascii_case("all") {
            return Ok(self.model_names());
        }
        self.model(selector)?;
        Ok(vec![selector.to_string()])
    }

    /// Parse a comma-separated model list, validating each entry.
    pub fn parse_model_list(&self, list: &str) -> Result<Vec<String>, DatasetError> {
        let models: Vec<String> = list
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if models.is_empty() {
            return Err(DatasetError::UnknownModel {
                name: list.to_string(),
                available: self.model_names().join(", "),
            });
        }
        for model in &models {
            self.model(model)?;
        }
        Ok(models)
    }

    /// Validate the configuration.
    ///
    /// Returns an error for values the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datasets.is_empty() {
            return Err(ConfigError::Invalid {
                message: "at least one dataset must be configured".to_string(),
            });
        }
        for (name, model) in &self.models {
            if model.max_concurrent == 0 {
                return Err(ConfigError::Invalid {
                    message: format!("model '{}' has max_concurrent = 0", name),
                });
            }
            if !(0.0..=2.0).contains(&model.temperature) {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "model '{}' temperature {} outside 0.0..=2.0",
                        name, model.temperature
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Load configuration from the layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `TYPEBENCH_`)
/// 3. Workspace-local config (`typebench.toml`)
/// 4. User config (`~/.config/typebench/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&BenchConfig>,
) -> Result<BenchConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(BenchConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "typebench", "typebench") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(WORKSPACE_CONFIG_FILE);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // TYPEBENCH_DISPATCH__PROGRESS_INTERVAL, TYPEBENCH_PATHS__ROOT, ...
    figment = figment.merge(Env::prefixed("TYPEBENCH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Render a configuration as TOML, e.g. for `typebench config init`.
pub fn to_toml(config: &BenchConfig) -> Result<String, ConfigError> {
    toml::to_string_pretty(config).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

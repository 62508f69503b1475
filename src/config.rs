//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.docaudit.toml` files. Every field has a default, so a partial file
//! (or none at all) is fine.

use crate::analysis::{BudgetConfig, RunSettings, Thresholds};
use crate::error::AnalysisError;
use crate::oracle::{OllamaConfig, RetryPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".docaudit.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Retry policy for oracle calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Windowing settings.
    #[serde(default)]
    pub windowing: WindowingConfig,

    /// Prompt budget settings.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Merge and acceptance thresholds.
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Extra instructions for the model.
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Concurrent section calls per window.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Question registry path.
    #[serde(default = "default_questions")]
    pub questions: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            concurrency: default_concurrency(),
            questions: default_questions(),
        }
    }
}

fn default_output() -> String {
    "docaudit_answers.json".to_string()
}

fn default_concurrency() -> usize {
    5
}

fn default_questions() -> String {
    "questions.toml".to_string()
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens in response.
    #[serde(default)]
    pub max_tokens: Option<usize>,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    300
}

/// Exponential-backoff retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = no retries).
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Windowing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowingConfig {
    /// Pages per window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

impl Default for WindowingConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

fn default_window_size() -> usize {
    10
}

/// Extra instruction lines passed to every answer call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailsConfig {
    #[serde(default)]
    pub rules: Vec<String>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.docaudit.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only flags given on the command line override file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(retries) = args.retries {
            self.retry.max_retries = retries;
        }
        if let Some(window_size) = args.window_size {
            self.windowing.window_size = window_size;
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(ref questions) = args.questions {
            self.general.questions = questions.display().to_string();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Rejects values no run could use.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.windowing.window_size == 0 {
            return Err(AnalysisError::Config(
                "windowing.window_size must be at least 1".to_string(),
            ));
        }
        if self.general.concurrency == 0 {
            return Err(AnalysisError::Config(
                "general.concurrency must be at least 1".to_string(),
            ));
        }
        if self.budget.prompt_token_ceiling == 0 {
            return Err(AnalysisError::Config(
                "budget.prompt_token_ceiling must be at least 1".to_string(),
            ));
        }
        if self.budget.chars_per_token == 0 {
            return Err(AnalysisError::Config(
                "budget.chars_per_token must be at least 1".to_string(),
            ));
        }
        let bad = self.thresholds.out_of_range();
        if !bad.is_empty() {
            return Err(AnalysisError::Config(format!(
                "thresholds must be within [0, 1]: {}",
                bad.join(", ")
            )));
        }
        if self.retry.multiplier < 1.0 {
            return Err(AnalysisError::Config(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Pipeline settings for one run.
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            window_size: self.windowing.window_size,
            concurrency: self.general.concurrency,
            budget: self.budget.clone(),
            thresholds: self.thresholds,
            guardrails: self.guardrails.rules.clone(),
        }
    }

    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            ollama_url: self.model.ollama_url.clone(),
            model_name: self.model.name.clone(),
            temperature: self.model.temperature,
            timeout_seconds: self.model.timeout_seconds,
            max_tokens: self.model.max_tokens,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            multiplier: self.retry.multiplier,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.general.output)
    }

    pub fn questions_path(&self) -> PathBuf {
        PathBuf::from(&self.general.questions)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlPilotError};

/// Top-level sqlpilot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub replies: RepliesConfig,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 2048 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Limits and inputs of the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Correction attempts before the run gives up with a degraded answer.
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    /// Global ceiling on executed steps per run, independent of `retry_ceiling`.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Rows kept per statement in the state record.
    #[serde(default = "default_row_cap")]
    pub row_cap: usize,
    /// Text file with the schema description. Introspected from the database when unset.
    #[serde(default)]
    pub schema_file: Option<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: default_retry_ceiling(),
            max_steps: default_max_steps(),
            row_cap: default_row_cap(),
            schema_file: None,
        }
    }
}

impl WorkflowConfig {
    /// Steps a run takes when it succeeds on its last correction attempt and
    /// draws a chart. Each correction costs two steps, the rest six.
    pub fn min_steps(&self) -> usize {
        (self.retry_ceiling as usize)
            .saturating_mul(2)
            .saturating_add(6)
    }

    /// Reject limits the workflow cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.row_cap == 0 {
            return Err(SqlPilotError::Config(
                "workflow.row_cap must be at least 1".into(),
            ));
        }
        if self.max_steps < self.min_steps() {
            return Err(SqlPilotError::Config(format!(
                "workflow.max_steps is {} but retry_ceiling {} needs at least {}",
                self.max_steps,
                self.retry_ceiling,
                self.min_steps()
            )));
        }
        Ok(())
    }
}

fn default_retry_ceiling() -> u32 { 3 }
fn default_max_steps() -> usize { 50 }
fn default_row_cap() -> usize { 100 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Reject statements that would modify the database.
    #[serde(default = "default_read_only")]
    pub read_only: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            read_only: default_read_only(),
        }
    }
}

fn default_db_path() -> String { "ecommerce.db".to_string() }
fn default_read_only() -> bool { true }

/// Canned replies for questions that never reach SQL generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepliesConfig {
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_out_of_scope")]
    pub out_of_scope: String,
}

impl Default for RepliesConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            out_of_scope: default_out_of_scope(),
        }
    }
}

fn default_greeting() -> String {
    "Hello! Ask me anything about the orders, customers, products, sellers, payments or reviews in the database.".to_string()
}

fn default_out_of_scope() -> String {
    "This question is outside what the database can answer.".to_string()
}

/// JSONL run logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ~/.sqlpilot/logs
    #[serde(default)]
    pub log_dir: Option<String>,
    /// 1 = run terminations, 2 = + finished steps, 3 = every event.
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: None,
            level: default_log_level(),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_level() -> u8 { 2 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| SqlPilotError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| SqlPilotError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the workflow cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.workflow.validate()
    }

    /// Resolve the JSONL log directory (expand ~).
    pub fn log_dir(&self) -> PathBuf {
        let dir = self
            .log
            .as_ref()
            .and_then(|l| l.log_dir.clone())
            .unwrap_or_else(|| "~/.sqlpilot/logs".to_string());
        expand_home(&dir)
    }

    /// Resolve the database path (expand ~).
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.database.path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

//! Configuration management
//!
//! This module handles loading, validation, and management of the Recap configuration.
//! Configuration is stored in TOML format at ~/.recap/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **model**: Model backend connection and sampling parameters
//! - **research**: Prompt templates and the cycle/turn/step budgets
//! - **invoker**: Retry and rate-limit policy for model calls
//! - **tools**: Web search and page reader endpoints
//!
//! API keys never live in the file. Each section names the secret it needs
//! (`api_key_name`, `serper_api_key_name`, ...) and the secrets module
//! resolves it from the environment or the OS keychain.
//!
//! # Environment Overrides
//!
//! `LLM_RETRY_ATTEMPTS`, `LLM_RETRY_INTERVAL` and `LLM_QPS_LIMIT` override the
//! matching `[invoker]` values after the file is parsed.
//!
//! # Examples
//!
//! ```no_run
//! use recap_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Model: {}", config.model.model_name);
//! println!("Cycles: {}", config.research.max_cycles);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Names of the tools the engine ships
pub const KNOWN_TOOLS: &[&str] = &["search", "visit"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Model backend configuration
    pub model: ModelConfig,

    /// Research loop configuration
    #[serde(default)]
    pub research: ResearchConfig,

    /// Retry and rate-limit policy
    #[serde(default)]
    pub invoker: InvokerConfig,

    /// Tool endpoints
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

/// Model backend configuration
///
/// Targets any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,

    /// Base URL for the chat completions API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Name of the secret holding the API key
    #[serde(default = "default_model_api_key_name")]
    pub api_key_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Per-call timeout in seconds
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,

    /// Token budget for one cycle; unset means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_length: Option<u64>,

    /// Gate every model call through the shared QPS limiter
    #[serde(default)]
    pub enable_qps_limit: bool,

    /// Tools bound to the model, by registered name
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,

    /// Extra JSON fields merged into every request body
    #[serde(default)]
    pub extra_body: serde_json::Map<String, serde_json::Value>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: default_openai_model(),
            base_url: default_openai_base_url(),
            api_key_name: default_model_api_key_name(),
            temperature: None,
            top_p: None,
            timeout_secs: default_model_timeout(),
            max_context_length: None,
            enable_qps_limit: false,
            tools: default_tools(),
            extra_body: serde_json::Map::new(),
        }
    }
}

/// Research loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Opening instruction of every cycle after the first; `{last_summary}` is substituted
    #[serde(default = "default_continue_prompt")]
    pub continue_prompt: String,

    /// Forced-summary request; `{input}` is the question
    #[serde(default = "default_summary_prompt")]
    pub summary_prompt: String,

    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,

    /// Tool results allowed in one cycle before a summary is forced
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Hard ceiling on state transitions per run
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            continue_prompt: default_continue_prompt(),
            summary_prompt: default_summary_prompt(),
            max_cycles: default_max_cycles(),
            max_turns: default_max_turns(),
            max_steps: default_max_steps(),
        }
    }
}

/// Retry and rate-limit policy for model calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between attempts, in seconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Calls admitted per rolling second when the limiter is enabled
    #[serde(default = "default_qps_limit")]
    pub qps_limit: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_interval_secs: default_retry_interval(),
            qps_limit: default_qps_limit(),
        }
    }
}

/// Tool endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Custom tool server exposing `POST /search` and `POST /visit`.
    /// When set, Serper and Jina are not used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    #[serde(default = "default_serper_url")]
    pub serper_url: String,

    #[serde(default = "default_serper_api_key_name")]
    pub serper_api_key_name: String,

    #[serde(default = "default_jina_url")]
    pub jina_url: String,

    #[serde(default = "default_jina_api_key_name")]
    pub jina_api_key_name: String,

    /// Per-request timeout for tool HTTP calls, in seconds
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,

    /// Model used to summarize visited pages; unset fields fall back to `[model]`
    #[serde(default)]
    pub summarizer: SummarizerConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            serper_url: default_serper_url(),
            serper_api_key_name: default_serper_api_key_name(),
            jina_url: default_jina_url(),
            jina_api_key_name: default_jina_api_key_name(),
            timeout_secs: default_tool_timeout(),
            summarizer: SummarizerConfig::default(),
        }
    }
}

/// Overrides for the page summarizer model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_name: Option<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.recap")
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_model_api_key_name() -> String {
    "openai_api_key".to_string()
}

fn default_model_timeout() -> u64 {
    300
}

fn default_tools() -> Vec<String> {
    KNOWN_TOOLS.iter().map(|s| s.to_string()).collect()
}

fn default_system_prompt() -> String {
    "You are a deep research assistant. Answer the user's question by searching the web \
     with the `search` tool and reading pages with the `visit` tool. Verify facts across \
     sources before answering. When you are confident, reply with the final answer and \
     no tool calls."
        .to_string()
}

fn default_continue_prompt() -> String {
    "Here is a summary of your previous attempt:\n{last_summary}\n\nContinue the research \
     from this point. Do not repeat searches that already failed."
        .to_string()
}

fn default_summary_prompt() -> String {
    "Stop using tools now. Summarize everything you have found so far about the question \
     below: the facts you verified with their sources, the leads that remain open, and your \
     best current answer.\n\nQuestion: {input}"
        .to_string()
}

fn default_max_cycles() -> usize {
    3
}

fn default_max_turns() -> usize {
    30
}

fn default_max_steps() -> usize {
    10_000
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_interval() -> u64 {
    10
}

fn default_qps_limit() -> usize {
    40
}

fn default_serper_url() -> String {
    "https://google.serper.dev/search".to_string()
}

fn default_serper_api_key_name() -> String {
    "serper_api_key".to_string()
}

fn default_jina_url() -> String {
    "https://r.jina.ai".to_string()
}

fn default_jina_api_key_name() -> String {
    "jina_api_key".to_string()
}

fn default_tool_timeout() -> u64 {
    60
}

impl Config {
    /// Load configuration from the default location (~/.recap/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse, apply environment overrides and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default_config();

        // Written before processing so the file keeps the portable ~ form
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.recap/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".recap").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            model: ModelConfig::default(),
            research: ResearchConfig::default(),
            invoker: InvokerConfig::default(),
            tools: ToolsConfig::default(),
        }
    }

    /// Path of the run history database
    pub fn db_path(&self) -> PathBuf {
        self.core.data_dir.join("recap.db")
    }

    /// Apply `LLM_RETRY_ATTEMPTS`, `LLM_RETRY_INTERVAL` and `LLM_QPS_LIMIT`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LLM_RETRY_ATTEMPTS") {
            self.invoker.retry_attempts = parse_override("LLM_RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = lookup("LLM_RETRY_INTERVAL") {
            self.invoker.retry_interval_secs = parse_override("LLM_RETRY_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("LLM_QPS_LIMIT") {
            self.invoker.qps_limit = parse_override("LLM_QPS_LIMIT", &value)?;
        }
        Ok(())
    }

    /// Validate and process configuration
    ///
    /// Checks value ranges and template placeholders, expands ~ in the data
    /// directory and creates it when missing.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.model.model_name.trim().is_empty() {
            return Err(EngineError::Config("model.model_name is required".to_string()));
        }

        if self.model.timeout_secs == 0 {
            return Err(EngineError::Config(
                "model.timeout_secs must be greater than 0".to_string(),
            ));
        }

        for tool in &self.model.tools {
            if !KNOWN_TOOLS.contains(&tool.as_str()) {
                return Err(EngineError::Config(format!(
                    "Tool '{}' not registered. Available: {}",
                    tool,
                    KNOWN_TOOLS.join(", ")
                )));
            }
        }

        if self.research.max_cycles == 0 {
            return Err(EngineError::Config(
                "research.max_cycles must be at least 1".to_string(),
            ));
        }

        if self.research.max_steps == 0 {
            return Err(EngineError::Config(
                "research.max_steps must be at least 1".to_string(),
            ));
        }

        if !self.research.continue_prompt.contains("{last_summary}") {
            return Err(EngineError::Config(
                "research.continue_prompt must contain {last_summary}".to_string(),
            ));
        }

        if self.invoker.retry_attempts == 0 {
            return Err(EngineError::Config(
                "invoker.retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.invoker.qps_limit == 0 {
            return Err(EngineError::Config(
                "invoker.qps_limit must be at least 1".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, EngineError> {
    value.trim().parse().map_err(|_| {
        EngineError::Config(format!("Invalid value '{}' for {}", value, name))
    })
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.model.timeout_secs, 300);
        assert!(!config.model.enable_qps_limit);
        assert_eq!(config.model.tools, vec!["search", "visit"]);
        assert_eq!(config.invoker.retry_attempts, 5);
        assert_eq!(config.invoker.retry_interval_secs, 10);
        assert_eq!(config.invoker.qps_limit, 40);
        assert_eq!(config.research.max_steps, 10_000);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.model.model_name, deserialized.model.model_name);
        assert_eq!(
            config.research.summary_prompt,
            deserialized.research.summary_prompt
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default_config();
        config
            .apply_env_overrides(|name| match name {
                "LLM_RETRY_ATTEMPTS" => Some("2".to_string()),
                "LLM_QPS_LIMIT" => Some(" 7 ".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.invoker.retry_attempts, 2);
        assert_eq!(config.invoker.retry_interval_secs, 10);
        assert_eq!(config.invoker.qps_limit, 7);
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = Config::default_config();
        let result = config.apply_env_overrides(|name| {
            (name == "LLM_RETRY_INTERVAL").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let mut config = Config::default_config();
        config.core.data_dir = std::env::temp_dir();
        config.model.tools = vec!["search".to_string(), "browse".to_string()];

        let err = config.validate_and_process().unwrap_err();
        assert!(err.to_string().contains("browse"));
    }

    #[test]
    fn test_continue_prompt_requires_placeholder() {
        let mut config = Config::default_config();
        config.core.data_dir = std::env::temp_dir();
        config.research.continue_prompt = "keep going".to_string();

        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_zero_cycles_rejected() {
        let mut config = Config::default_config();
        config.core.data_dir = std::env::temp_dir();
        config.research.max_cycles = 0;

        assert!(config.validate_and_process().is_err());
    }
}

//! Configuration management for the CodeAct agent.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. Your OpenRouter API key.
//! - `LLM_BASE_URL` - Optional. OpenAI-compatible endpoint. Defaults to `https://openrouter.ai/api/v1`.
//! - `DEFAULT_MODEL` - Optional. The LLM model to use. Defaults to `anthropic/claude-sonnet-4.5`.
//! - `CODEACT_BASE_INSTRUCTIONS` - Optional. Text placed ahead of the generated system prompt.
//! - `CODEACT_PYTHON` - Optional. Interpreter for the script sandbox. Defaults to `python3`.
//! - `CODEACT_EXEC_TIMEOUT_SECS` - Optional. Per-script wall-clock limit. Defaults to `60`.
//! - `CODEACT_MAX_OUTPUT_CHARS` - Optional. Longest script output fed back. Defaults to `10000`.
//! - `CODEACT_MAX_TURNS` - Optional. Turn limit per task. Unbounded when unset.
//! - `CODEACT_COMBINE_BLOCKS` - Optional. Run every fenced block of a reply instead of the first.
//! - `CODEACT_STATE_DIR` - Optional. Directory for persisted threads. In-memory when unset.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::llm::DEFAULT_BASE_URL;
use crate::sandbox::PythonSandboxConfig;

pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key
    pub api_key: String,

    pub llm_base_url: String,

    pub default_model: String,

    pub base_instructions: Option<String>,

    pub python_command: String,

    pub exec_timeout: Duration,

    pub max_output_chars: usize,

    /// Turn limit per task; `None` is unbounded
    pub max_turns: Option<usize>,

    pub combine_blocks: bool,

    /// Where threads are persisted; `None` keeps them in memory
    pub state_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = var("OPENROUTER_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let llm_base_url = var("LLM_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let default_model = var("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_instructions = var("CODEACT_BASE_INSTRUCTIONS").filter(|v| !v.is_empty());

        let python_command = var("CODEACT_PYTHON").unwrap_or_else(|| "python3".to_string());

        let exec_timeout_secs: u64 = parse_var(&var, "CODEACT_EXEC_TIMEOUT_SECS")?.unwrap_or(60);
        if exec_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "CODEACT_EXEC_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let max_output_chars = parse_var(&var, "CODEACT_MAX_OUTPUT_CHARS")?.unwrap_or(10_000);

        let max_turns = parse_var(&var, "CODEACT_MAX_TURNS")?;

        let combine_blocks = var("CODEACT_COMBINE_BLOCKS")
            .map(|v| {
                parse_bool(&v)
                    .map_err(|e| ConfigError::InvalidValue("CODEACT_COMBINE_BLOCKS".to_string(), e))
            })
            .transpose()?
            .unwrap_or(false);

        let state_dir = var("CODEACT_STATE_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            api_key,
            llm_base_url,
            default_model,
            base_instructions,
            python_command,
            exec_timeout: Duration::from_secs(exec_timeout_secs),
            max_output_chars,
            max_turns,
            combine_blocks,
            state_dir,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            llm_base_url: DEFAULT_BASE_URL.to_string(),
            default_model,
            base_instructions: None,
            python_command: "python3".to_string(),
            exec_timeout: Duration::from_secs(60),
            max_output_chars: 10_000,
            max_turns: None,
            combine_blocks: false,
            state_dir: None,
        }
    }

    pub fn sandbox_config(&self) -> PythonSandboxConfig {
        PythonSandboxConfig {
            python_command: self.python_command.clone(),
            timeout: self.exec_timeout,
            max_output_chars: self.max_output_chars,
        }
    }
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e)))
        })
        .transpose()
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}

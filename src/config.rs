use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{GeneratorError, Result};
use crate::llm::prompts::DEFAULT_SYSTEM_MESSAGE;
use crate::llm::session::SamplingParams;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// System preamble placed first in every assembled prompt.
    #[serde(default = "default_system_message")]
    pub system_message: String,

    #[serde(default)]
    pub llm: LlmConfig,

    /// Backend settings such as credentials, model identifiers and service
    /// URLs.  Process environment variables with the same name take
    /// precedence at call time.
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

// -- LLM -----------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Backend to use: "llama3" (default) or "ollama".
    /// Can be overridden with the `GENERATOR_BACKEND` env var.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Maximum tokens to generate per response.
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,

    /// Sample from the distribution instead of decoding greedily.
    #[serde(default = "default_true")]
    pub do_sample: bool,

    /// Sampling temperature (ignored when `do_sample` is false).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Top-P (nucleus) sampling.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// HTTP timeout in seconds for remote backends (0 = no timeout).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Offload local inference to the GPU when the build supports it.
    #[serde(default)]
    pub use_gpu: bool,
}

impl LlmConfig {
    /// Sampling parameters without any backend-specific stop sequences.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            max_new_tokens: self.max_new_tokens,
            do_sample: self.do_sample,
            temperature: self.temperature,
            top_p: self.top_p,
            stop_sequences: Vec::new(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            max_new_tokens: default_max_new_tokens(),
            do_sample: true,
            temperature: default_temperature(),
            top_p: default_top_p(),
            timeout_secs: default_timeout_secs(),
            use_gpu: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_message: default_system_message(),
            llm: LlmConfig::default(),
            settings: HashMap::new(),
        }
    }
}

fn default_system_message() -> String {
    DEFAULT_SYSTEM_MESSAGE.to_string()
}
fn default_backend() -> String {
    "llama3".to_string()
}
fn default_max_new_tokens() -> usize {
    256
}
fn default_temperature() -> f32 {
    0.6
}
fn default_top_p() -> f32 {
    0.9
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

// -- Config impl ---------------------------------------------------------

impl Config {
    /// Load config from the given path, or the default XDG config location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path(),
        };

        let config = if config_path.exists() {
            info!("loading config from {}", config_path.display());
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents)
                .map_err(|e| GeneratorError::Config(format!("parse error: {e}")))?
        } else {
            info!("no config file found, using defaults");
            Config::default()
        };

        Ok(config)
    }

    /// Returns the default config file path: `$XDG_CONFIG_HOME/rag-generator/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("rag-generator")
            .join("config.toml")
    }

    /// Returns the data directory: `$XDG_DATA_HOME/rag-generator/`
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("rag-generator")
    }

    /// Generate the default config file contents.
    pub fn default_config_contents() -> &'static str {
        include_str!("../config.example.toml")
    }
}

use thiserror::Error;

use crate::llm::settings::ConfigError;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("config error: {0}")]
    Config(String),

    #[error("setting error: {0}")]
    Setting(#[from] ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GeneratorError>;

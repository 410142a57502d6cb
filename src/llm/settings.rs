use std::collections::HashMap;
use std::ffi::OsString;

use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::error::{GeneratorError, Result};

/// A configuration value a backend needs before it can be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequiredSetting {
    /// Settings key, e.g. `HUGGINGFACE_TOKEN`.
    pub key: &'static str,
    /// Human-readable name used when the value is missing.
    pub label: &'static str,
}

impl RequiredSetting {
    pub const fn new(key: &'static str, label: &'static str) -> Self {
        Self { key, label }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing {label}")]
    Missing { key: String, label: String },
}

impl ConfigError {
    /// Key of the setting that failed validation.
    pub fn key(&self) -> &str {
        match self {
            ConfigError::Missing { key, .. } => key,
        }
    }
}

/// Snapshot of named configuration values handed to a generator per call.
///
/// Built from the `[settings]` table of the config file overlaid by the
/// process environment, so a variable set in the environment wins.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config-file settings overlaid by the current process environment.
    pub fn resolve(config: &Config) -> Self {
        Self {
            values: config.settings.clone(),
        }
        .overlay(std::env::vars_os())
    }

    /// Overlay `vars`, skipping any key or value that is not valid UTF-8.
    fn overlay(mut self, vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        for (key, value) in vars {
            if let (Ok(key), Ok(value)) = (key.into_string(), value.into_string()) {
                self.values.insert(key, value);
            }
        }
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Validated values for exactly the settings a backend declared.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    values: HashMap<&'static str, String>,
}

impl Credentials {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Like `get`, but a key the backend never declared is an error.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            GeneratorError::Config(format!("setting {key} was not declared by this backend"))
        })
    }
}

/// Check that every required setting is present and non-empty.
///
/// The first missing setting, in declaration order, is reported.
pub fn validate(
    settings: &Settings,
    required: &[RequiredSetting],
) -> std::result::Result<Credentials, ConfigError> {
    let mut values = HashMap::with_capacity(required.len());
    for req in required {
        match settings.get(req.key) {
            Some(v) if !v.is_empty() => {
                values.insert(req.key, v.to_string());
            }
            _ => {
                return Err(ConfigError::Missing {
                    key: req.key.to_string(),
                    label: req.label.to_string(),
                });
            }
        }
    }
    Ok(Credentials { values })
}

//! Model settings
//!
//! A plugin (or an instance) names the model it wants through a handful of
//! well-known keys in its resolved settings map. `ModelSettings` is the typed
//! view of those keys and doubles as the identity used by the shared model cache.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings key naming the model configuration
pub const KEY_MODEL_CONFIG_ID: &str = "model_config_id";
/// Settings key naming the model inside the configuration
pub const KEY_MODEL_NAME: &str = "model_name";
/// Settings key for the sampling temperature
pub const KEY_TEMPERATURE: &str = "temperature";
/// Settings key for the response token limit
pub const KEY_MAX_TOKENS: &str = "max_tokens";

/// Model name used when a configuration is named without a model
pub const DEFAULT_MODEL_NAME: &str = "default";
/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
/// Default response token limit
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Typed model selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Model configuration identifier (provider credentials + endpoint)
    pub config_id: String,
    /// Model name within the configuration
    #[serde(default = "default_model_name")]
    pub model_name: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum tokens in a response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model_name() -> String {
    DEFAULT_MODEL_NAME.to_string()
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl ModelSettings {
    /// Create settings for a configuration with default sampling parameters
    #[must_use]
    pub fn new(config_id: impl Into<String>) -> Self {
        Self {
            config_id: config_id.into(),
            model_name: default_model_name(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    /// Set the model name
    #[must_use]
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Extract model settings from a resolved settings map.
    ///
    /// Returns `Ok(None)` when no model configuration is named; the plugin then
    /// relies on the instance's top-level model.
    pub fn from_settings(settings: &BTreeMap<String, serde_json::Value>) -> Result<Option<Self>> {
        let config_id = match settings.get(KEY_MODEL_CONFIG_ID) {
            None | Some(serde_json::Value::Null) => return Ok(None),
            Some(serde_json::Value::String(s)) if s.is_empty() => return Ok(None),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(Error::InvalidSettings(format!(
                    "{} must be a string or number, got {}",
                    KEY_MODEL_CONFIG_ID, other
                )))
            }
        };

        let mut model = Self::new(config_id);

        if let Some(name) = settings.get(KEY_MODEL_NAME).and_then(|v| v.as_str()) {
            if !name.is_empty() {
                model.model_name = name.to_string();
            }
        }

        match settings.get(KEY_TEMPERATURE) {
            None | Some(serde_json::Value::Null) => {}
            Some(v) => {
                model.temperature = v.as_f64().ok_or_else(|| {
                    Error::InvalidSettings(format!("{} must be a number", KEY_TEMPERATURE))
                })?;
            }
        }

        match settings.get(KEY_MAX_TOKENS) {
            None | Some(serde_json::Value::Null) => {}
            Some(v) => {
                let tokens = v.as_u64().ok_or_else(|| {
                    Error::InvalidSettings(format!(
                        "{} must be a non-negative integer",
                        KEY_MAX_TOKENS
                    ))
                })?;
                model.max_tokens = u32::try_from(tokens).map_err(|_| {
                    Error::InvalidSettings(format!("{} out of range: {}", KEY_MAX_TOKENS, tokens))
                })?;
            }
        }

        model.validate()?;
        Ok(Some(model))
    }

    /// Validate ranges
    pub fn validate(&self) -> Result<()> {
        if self.config_id.trim().is_empty() {
            return Err(Error::InvalidSettings("config_id is empty".to_string()));
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::InvalidSettings(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(Error::InvalidSettings("max_tokens must be positive".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Display for ModelSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} (t={}, max={})",
            self.config_id, self.model_name, self.temperature, self.max_tokens
        )
    }
}

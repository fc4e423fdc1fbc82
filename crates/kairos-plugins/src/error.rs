//! Error types for kairos-plugins

use thiserror::Error;

/// Plugin error type
#[derive(Debug, Error)]
pub enum Error {
    /// Plugin (or plugin version) not found in the catalog
    #[error("plugin not found: {0}")]
    NotFound(String),

    /// Malformed plugin spec string
    #[error("invalid plugin spec: {0}")]
    InvalidSpec(String),

    /// Required settings missing after resolution
    #[error("plugin '{plugin}' missing required settings: {}", keys.join(", "))]
    MissingSettings {
        /// Plugin identifier
        plugin: String,
        /// Missing setting keys
        keys: Vec<String>,
    },

    /// Override entry that is neither a map nor the list form
    #[error("invalid settings overrides for '{plugin}': {message}")]
    InvalidOverrides {
        /// Override lookup key
        plugin: String,
        /// Detailed message
        message: String,
    },

    /// Structural or dependency validation failed
    #[error("plugin '{plugin}' validation failed: {}", errors.join("; "))]
    Validation {
        /// Plugin identifier
        plugin: String,
        /// Collected validation errors
        errors: Vec<String>,
    },

    /// Agent construction or hook failure
    #[error("plugin '{plugin}' agent error: {message}")]
    Agent {
        /// Plugin identifier
        plugin: String,
        /// Detailed message
        message: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

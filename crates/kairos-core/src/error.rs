//! Error types for kairos-core
//!
//! This module provides the pool's error taxonomy and user-friendly formatting.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration (bad pool settings, malformed plugin spec, ...)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No backend registered for the requested pair
    #[error(
        "unsupported backend/mode '{backend}/{mode}'; supported: {}",
        supported.join(", ")
    )]
    UnsupportedBackend {
        /// Requested backend kind
        backend: String,
        /// Requested mode
        mode: String,
        /// Registered `backend/mode` pairs
        supported: Vec<String>,
    },

    /// Plugin structural or dependency validation failed
    #[error("validation error: {0}")]
    Validation(String),

    /// Model, bundle, template or instance construction failed
    #[error("resource build error: {0}")]
    ResourceBuild(String),

    /// Unknown instance or record
    #[error("not found: {0}")]
    NotFound(String),

    /// Instance is already present in the pool
    #[error("instance already exists: {0}")]
    AlreadyExists(String),

    /// Operation exceeded its time bound
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// Plugin contract error
    #[error("plugin error: {0}")]
    Plugin(#[from] kairos_plugins::Error),

    /// Model client error
    #[error("model error: {0}")]
    Model(#[from] kairos_llm::Error),

    /// Internal error (store failures, invariant violations)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classes used for retry and reporting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal to the build, never retried
    Configuration,
    /// Fatal to the plugin's load
    Validation,
    /// Construction failed; the caller may retry
    ResourceBuild,
    /// Unknown key or instance
    NotFound,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_)
            | Error::UnsupportedBackend { .. }
            | Error::AlreadyExists(_) => ErrorKind::Configuration,
            Error::Validation(_) => ErrorKind::Validation,
            Error::ResourceBuild(_) | Error::Timeout(_) => ErrorKind::ResourceBuild,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Plugin(e) => match e {
                kairos_plugins::Error::NotFound(_) => ErrorKind::NotFound,
                kairos_plugins::Error::Validation { .. } => ErrorKind::Validation,
                kairos_plugins::Error::Agent { .. } => ErrorKind::ResourceBuild,
                kairos_plugins::Error::InvalidSpec(_)
                | kairos_plugins::Error::MissingSettings { .. }
                | kairos_plugins::Error::InvalidOverrides { .. } => ErrorKind::Configuration,
            },
            Error::Model(e) => match e {
                kairos_llm::Error::ConfigNotFound(_) | kairos_llm::Error::InvalidSettings(_) => {
                    ErrorKind::Configuration
                }
                kairos_llm::Error::Provider(_)
                | kairos_llm::Error::Completion(_)
                | kairos_llm::Error::Timeout(_) => ErrorKind::ResourceBuild,
            },
        }
    }

    /// Whether retrying the same call may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ResourceBuild
    }
}

/// Trait for user-friendly error messages
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::UnsupportedBackend { backend, mode, .. } => {
                format!("⚙️ No backend registered for '{}/{}'.", backend, mode)
            }
            Error::Configuration(msg) => format!("⚙️ Configuration error: {}", msg),
            Error::Validation(msg) => format!("🧩 Plugin validation failed: {}", msg),
            Error::ResourceBuild(msg) => format!("🏗️ Failed to build a resource: {}", msg),
            Error::NotFound(what) => format!("🔍 Not found: {}", what),
            Error::AlreadyExists(what) => format!("📦 Instance already exists: {}", what),
            Error::Timeout(ms) => format!("⏳ Operation timed out after {}ms.", ms),
            Error::Plugin(e) => format!("🧩 Plugin error: {}", e),
            Error::Model(e) => format!("🤖 Model error: {}", e),
            Error::Internal(msg) => format!("❌ Internal error: {}", msg),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::UnsupportedBackend { supported, .. } => Some(format!(
                "💡 Use one of: {}. Run `kairos backends` to list them.",
                supported.join(", ")
            )),
            Error::Plugin(kairos_plugins::Error::MissingSettings { keys, .. }) => Some(format!(
                "💡 Add {} to the instance's plugin_settings.",
                keys.join(", ")
            )),
            Error::Configuration(_) => {
                Some("💡 Check config/default.toml or KAIROS_* environment variables.".to_string())
            }
            Error::NotFound(_) => {
                Some("💡 Make sure the instance is declared in the configuration store.".to_string())
            }
            Error::Timeout(_) | Error::ResourceBuild(_) => {
                Some("💡 This error is transient; retry the request.".to_string())
            }
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = error.user_message();
    output.push_str("\n\n");

    if let Some(suggestion) = error.suggestion() {
        output.push_str(&suggestion);
        output.push('\n');
    }

    output
}

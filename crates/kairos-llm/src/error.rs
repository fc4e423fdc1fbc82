//! Error types for kairos-llm

use thiserror::Error;

/// Model error type
#[derive(Debug, Error)]
pub enum Error {
    /// Model configuration not known to the provider
    #[error("model configuration not found: {0}")]
    ConfigNotFound(String),

    /// Provider refused to construct a client
    #[error("provider error: {0}")]
    Provider(String),

    /// Invalid model settings
    #[error("invalid model settings: {0}")]
    InvalidSettings(String),

    /// Completion request failed
    #[error("completion failed: {0}")]
    Completion(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

//! Kairos LLM - Model Client Abstraction
//!
//! This crate provides the model side of the Kairos instance pool:
//! - Settings: The `(config, name, temperature, max tokens)` identity of a bound model
//! - Client: The trait every bound model client implements
//! - Provider: Constructs model clients from a named model configuration
//! - Local: Deterministic offline provider used by the operator binary and tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod local;
pub mod provider;
pub mod settings;

pub use client::{ModelClient, ModelHealth};
pub use error::{Error, Result};
pub use local::{LocalModelClient, LocalModelProvider};
pub use provider::ModelProvider;
pub use settings::{ModelSettings, DEFAULT_MAX_TOKENS, DEFAULT_MODEL_NAME, DEFAULT_TEMPERATURE};

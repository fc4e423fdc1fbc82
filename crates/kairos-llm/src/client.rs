//! Model client trait
//!
//! This module defines the trait every bound model client implements. Clients
//! are stateless with respect to callers, which is what lets the pool share one
//! client between many orchestrator instances.

use crate::error::Result;
use crate::settings::ModelSettings;
use serde::Serialize;

/// Health report of a model client
#[derive(Debug, Clone, Serialize)]
pub struct ModelHealth {
    /// Whether the client can serve requests
    pub healthy: bool,
    /// Model name
    pub model: String,
    /// Optional detail message
    pub detail: Option<String>,
}

/// Trait for bound model clients
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Settings the client was constructed with
    fn settings(&self) -> &ModelSettings;

    /// Model name
    fn model_name(&self) -> &str {
        &self.settings().model_name
    }

    /// Model configuration identifier
    fn config_id(&self) -> &str {
        &self.settings().config_id
    }

    /// Complete a prompt
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Check that the client can still reach its backend
    async fn health_check(&self) -> Result<ModelHealth> {
        Ok(ModelHealth {
            healthy: true,
            model: self.model_name().to_string(),
            detail: None,
        })
    }

    /// Release any connection held by the client
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

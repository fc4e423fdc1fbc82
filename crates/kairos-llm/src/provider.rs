//! Model provider trait
//!
//! A provider turns a named model configuration into a ready client. The pool
//! never calls a provider directly; the shared model cache does, at most once
//! per distinct `ModelSettings`.

use crate::client::ModelClient;
use crate::error::Result;
use crate::settings::ModelSettings;
use std::sync::Arc;

/// Trait for model providers
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Construct a client for the given settings on behalf of a tenant
    async fn create_model(
        &self,
        tenant_id: &str,
        settings: &ModelSettings,
    ) -> Result<Arc<dyn ModelClient>>;
}

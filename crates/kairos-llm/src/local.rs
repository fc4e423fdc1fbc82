//! Local model provider
//!
//! Deterministic, offline model clients. Completions echo the prompt with the
//! model identity so callers can see which shared client served them.

use crate::client::{ModelClient, ModelHealth};
use crate::error::{Error, Result};
use crate::provider::ModelProvider;
use crate::settings::ModelSettings;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// A local model client that echoes prompts.
pub struct LocalModelClient {
    settings: ModelSettings,
    closed: AtomicBool,
}

impl LocalModelClient {
    /// Create a new local client.
    #[must_use]
    pub fn new(settings: ModelSettings) -> Self {
        Self {
            settings,
            closed: AtomicBool::new(false),
        }
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModelClient for LocalModelClient {
    fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        if self.is_closed() {
            return Err(Error::Completion(format!(
                "client {} is closed",
                self.settings
            )));
        }
        Ok(format!("[{}] {}", self.settings.model_name, prompt))
    }

    async fn health_check(&self) -> Result<ModelHealth> {
        Ok(ModelHealth {
            healthy: !self.is_closed(),
            model: self.settings.model_name.clone(),
            detail: self.is_closed().then(|| "closed".to_string()),
        })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider handing out `LocalModelClient`s.
///
/// Only configurations registered with [`LocalModelProvider::with_config`] are
/// accepted unless the provider was built with [`LocalModelProvider::permissive`].
pub struct LocalModelProvider {
    known_configs: Mutex<HashSet<String>>,
    permissive: bool,
    created: AtomicUsize,
    build_delay: Option<Duration>,
}

impl Default for LocalModelProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalModelProvider {
    /// Create a provider that only accepts registered configurations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            known_configs: Mutex::new(HashSet::new()),
            permissive: false,
            created: AtomicUsize::new(0),
            build_delay: None,
        }
    }

    /// Create a provider that accepts any configuration id.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::new()
        }
    }

    /// Register a known configuration.
    #[must_use]
    pub fn with_config(self, config_id: impl Into<String>) -> Self {
        self.known_configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(config_id.into());
        self
    }

    /// Simulate handshake latency on every construction.
    #[must_use]
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// Number of clients constructed so far.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModelProvider for LocalModelProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn create_model(
        &self,
        tenant_id: &str,
        settings: &ModelSettings,
    ) -> Result<Arc<dyn ModelClient>> {
        settings.validate()?;

        let known = self
            .known_configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&settings.config_id);
        if !self.permissive && !known {
            return Err(Error::ConfigNotFound(settings.config_id.clone()));
        }

        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }

        self.created.fetch_add(1, Ordering::SeqCst);
        debug!(tenant = %tenant_id, model = %settings, "Created local model client");
        Ok(Arc::new(LocalModelClient::new(settings.clone())))
    }
}

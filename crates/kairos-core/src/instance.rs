//! Instance - A materialized orchestrator for one tenant instance
//!
//! [`InstanceRecord`] is the durable configuration the store owns.
//! [`OrchestratorInstance`] is what the factory builds from it: adapter,
//! loaded plugins, optional template, optional top-level model, engine and
//! stream wrapper, plus the shared-cache leases the instance holds.

use crate::adapter::OrchestratorAdapter;
use crate::engine::{EngineContext, ExecutionEngine, ExecutionWrapper, StreamEvent};
use crate::error::{Error, Result};
use crate::plugin_manager::PluginManager;
use crate::resources::{SharedLeases, SharedResources};
use crate::template::ExecutionTemplate;
use kairos_llm::{ModelClient, ModelSettings};
use kairos_plugins::PluginOverrides;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// `(tenant, instance id)` identity of an instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    /// Tenant
    pub tenant_id: String,
    /// Instance id, unique within the tenant
    pub instance_id: String,
}

impl InstanceKey {
    /// Create a key
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.instance_id)
    }
}

/// Durable configuration of one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Tenant
    pub tenant_id: String,
    /// Instance id
    pub instance_id: String,
    /// Backend kind (`graph`, `agents`, ...)
    pub backend: String,
    /// Orchestration mode (`supervisor`, `coordinator`, `handoff`)
    pub mode: String,
    /// Plugin specs, `pid` or `pid@version`
    #[serde(default)]
    pub active_plugins: Vec<String>,
    /// Per-plugin setting overrides
    #[serde(default)]
    pub plugin_settings: PluginOverrides,
    /// Top-level model shared by plugins that do not name their own
    #[serde(default)]
    pub model: Option<ModelSettings>,
    /// Instance-level settings passed to the engine
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl InstanceRecord {
    /// Create a record with no plugins
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        instance_id: impl Into<String>,
        backend: impl Into<String>,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            instance_id: instance_id.into(),
            backend: backend.into(),
            mode: mode.into(),
            active_plugins: Vec::new(),
            plugin_settings: PluginOverrides::default(),
            model: None,
            settings: BTreeMap::new(),
        }
    }

    /// Add a plugin spec
    #[must_use]
    pub fn with_plugin(mut self, spec: impl Into<String>) -> Self {
        self.active_plugins.push(spec.into());
        self
    }

    /// Set the override entry for a plugin (`pid` or `pid@version`)
    #[must_use]
    pub fn with_plugin_settings(mut self, key: impl Into<String>, entry: serde_json::Value) -> Self {
        self.plugin_settings = self.plugin_settings.with_entry(key, entry);
        self
    }

    /// Set the top-level model
    #[must_use]
    pub fn with_model(mut self, model: ModelSettings) -> Self {
        self.model = Some(model);
        self
    }

    /// Set an instance-level setting
    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    /// Instance key
    #[must_use]
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.tenant_id.clone(), self.instance_id.clone())
    }

    /// SHA-256 hex digest of the record's JSON form
    #[must_use]
    pub fn config_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(&canonical))
    }
}

/// Health report of one instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceHealthDetail {
    /// Whether the instance can serve requests
    pub ready: bool,
    /// Backend kind
    pub backend: String,
    /// Mode
    pub mode: String,
    /// Loaded plugin ids
    pub plugins: Vec<String>,
    /// Top-level model name
    pub model: Option<String>,
    /// Detail when not ready
    pub detail: Option<String>,
}

/// The parts the factory assembles into an instance
pub struct InstanceParts {
    /// Instance key
    pub key: InstanceKey,
    /// Backend kind
    pub backend: String,
    /// Mode
    pub mode: String,
    /// Adapter
    pub adapter: Arc<dyn OrchestratorAdapter>,
    /// Loaded plugins
    pub plugins: PluginManager,
    /// Compiled template
    pub template: Option<Arc<ExecutionTemplate>>,
    /// Top-level model
    pub model: Option<Arc<dyn ModelClient>>,
    /// Instance-level settings
    pub settings: BTreeMap<String, serde_json::Value>,
    /// Engine
    pub engine: Box<dyn ExecutionEngine>,
    /// Stream wrapper
    pub wrapper: Arc<dyn ExecutionWrapper>,
    /// Shared-cache references owned by the instance
    pub leases: SharedLeases,
    /// Hash of the record the instance was built from
    pub config_hash: String,
}

/// A materialized, ready-to-serve orchestrator
pub struct OrchestratorInstance {
    key: InstanceKey,
    backend: String,
    mode: String,
    adapter: Arc<dyn OrchestratorAdapter>,
    plugins: PluginManager,
    template: Option<Arc<ExecutionTemplate>>,
    model: Option<Arc<dyn ModelClient>>,
    settings: BTreeMap<String, serde_json::Value>,
    engine: Box<dyn ExecutionEngine>,
    wrapper: Arc<dyn ExecutionWrapper>,
    leases: SharedLeases,
    config_hash: String,
    cleaned_up: AtomicBool,
    released: AtomicBool,
}

impl OrchestratorInstance {
    /// Assemble an instance; it is not ready until [`initialize`](Self::initialize)
    #[must_use]
    pub fn new(parts: InstanceParts) -> Self {
        Self {
            key: parts.key,
            backend: parts.backend,
            mode: parts.mode,
            adapter: parts.adapter,
            plugins: parts.plugins,
            template: parts.template,
            model: parts.model,
            settings: parts.settings,
            engine: parts.engine,
            wrapper: parts.wrapper,
            leases: parts.leases,
            config_hash: parts.config_hash,
            cleaned_up: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }
    }

    fn context(&self) -> EngineContext<'_> {
        EngineContext {
            tenant_id: &self.key.tenant_id,
            backend: &self.backend,
            mode: &self.mode,
            plugins: &self.plugins,
            template: self.template.as_deref(),
            model: self.model.as_ref(),
            settings: &self.settings,
        }
    }

    /// Instance key
    #[must_use]
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Backend kind
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Mode
    #[must_use]
    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Adapter kind
    #[must_use]
    pub fn adapter_kind(&self) -> &str {
        self.adapter.kind()
    }

    /// Loaded plugins
    #[must_use]
    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// Compiled template, if any
    #[must_use]
    pub fn template(&self) -> Option<&Arc<ExecutionTemplate>> {
        self.template.as_ref()
    }

    /// Top-level model, if any
    #[must_use]
    pub fn model(&self) -> Option<&Arc<dyn ModelClient>> {
        self.model.as_ref()
    }

    /// Shared-cache references held by the instance
    #[must_use]
    pub fn leases(&self) -> &SharedLeases {
        &self.leases
    }

    /// Hash of the record the instance was built from
    #[must_use]
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Prepare the engine
    pub async fn initialize(&self) -> Result<()> {
        self.engine.initialize(self.context()).await?;
        info!(
            instance = %self.key,
            backend = %self.backend,
            mode = %self.mode,
            plugins = self.plugins.len(),
            engine = self.engine.name(),
            "Instance initialized"
        );
        Ok(())
    }

    /// Readiness report
    pub async fn health_check(&self) -> InstanceHealthDetail {
        let engine = self.engine.health_check(self.context()).await;
        let cleaned_up = self.cleaned_up.load(Ordering::SeqCst);
        InstanceHealthDetail {
            ready: engine.ready && !cleaned_up,
            backend: self.backend.clone(),
            mode: self.mode.clone(),
            plugins: self.plugins.plugin_ids(),
            model: self.model.as_ref().map(|m| m.model_name().to_string()),
            detail: if cleaned_up {
                Some("cleaned up".to_string())
            } else {
                engine.detail
            },
        }
    }

    /// Run one request and return the normalized event stream
    pub async fn invoke(&self, prompt: &str) -> Result<Vec<StreamEvent>> {
        if self.cleaned_up.load(Ordering::SeqCst) {
            return Err(Error::Internal(format!(
                "instance {} has been cleaned up",
                self.key
            )));
        }
        let native = self.engine.execute(self.context(), prompt).await?;
        debug!(instance = %self.key, events = native.len(), "Instance invoked");
        Ok(self.wrapper.wrap(&native))
    }

    /// Release instance-owned resources: the engine and stateful bundles.
    ///
    /// Shared-cache references are untouched. Later calls do nothing.
    pub async fn cleanup(&mut self) {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.engine.cleanup().await {
            error!(instance = %self.key, error = %e, "Engine cleanup failed");
        }
        self.plugins.release_stateful().await;
        debug!(instance = %self.key, "Instance cleaned up");
    }

    /// Clean up and return every shared-cache reference. Later calls do nothing.
    pub async fn teardown(&mut self, resources: &SharedResources) {
        self.cleanup().await;
        if !self.released.swap(true, Ordering::SeqCst) {
            resources.release(&self.leases).await;
            info!(instance = %self.key, references = self.leases.len(), "Instance torn down");
        }
    }
}

impl fmt::Debug for OrchestratorInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorInstance")
            .field("key", &self.key)
            .field("backend", &self.backend)
            .field("mode", &self.mode)
            .field("plugins", &self.plugins.plugin_ids())
            .field("leases", &self.leases)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_display() {
        assert_eq!(InstanceKey::new("acme", "support").to_string(), "acme/support");
    }

    #[test]
    fn test_config_hash_tracks_content() {
        let record = InstanceRecord::new("acme", "support", "graph", "supervisor")
            .with_plugin("io.kairos.system.echo");
        let same = record.clone();
        let changed = record
            .clone()
            .with_plugin_settings("io.kairos.system.echo", json!({ "prefix": ">" }));

        assert_eq!(record.config_hash(), same.config_hash());
        assert_ne!(record.config_hash(), changed.config_hash());
        assert_eq!(record.config_hash().len(), 64);
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let record: InstanceRecord = serde_json::from_value(json!({
            "tenant_id": "acme",
            "instance_id": "support",
            "backend": "agents",
            "mode": "coordinator"
        }))
        .unwrap();
        assert!(record.active_plugins.is_empty());
        assert!(record.plugin_settings.is_empty());
        assert!(record.model.is_none());
        assert_eq!(record.key(), InstanceKey::new("acme", "support"));
    }
}

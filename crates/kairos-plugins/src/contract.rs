//! Contract - Plugin metadata, agents and optional capabilities
//!
//! A plugin is a factory for agents plus static metadata. Hooks that only some
//! plugins provide (dependency checks, agent initialization/cleanup) are
//! separate capability traits reached through accessor methods, so callers
//! never have to guess whether a hook exists.

use crate::error::Result;
use crate::settings::ResolvedSettings;
use crate::tool::ToolSpec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One entry of a plugin's declared settings schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingSpec {
    /// Setting key
    pub key: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Default value (null means "no default")
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Must be present and non-null after resolution
    #[serde(default)]
    pub required: bool,
    /// Must be masked whenever settings are displayed
    #[serde(default)]
    pub sensitive: bool,
}

impl SettingSpec {
    /// Create an optional setting without a default
    #[must_use]
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            default: None,
            required: false,
            sensitive: false,
        }
    }

    /// Set the default value
    #[must_use]
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark as required
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as sensitive
    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// Static plugin metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Reverse-domain plugin identifier (e.g. `io.kairos.system.echo`)
    pub pid: String,
    /// Display name
    pub name: String,
    /// Version string
    pub version: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Bundles hold no per-tenant state and may be shared across instances
    #[serde(default)]
    pub stateless: bool,
    /// Declared settings schema
    #[serde(default)]
    pub settings_schema: Vec<SettingSpec>,
    /// Free-form capability tags
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl PluginMetadata {
    /// Create metadata for a stateful plugin with no settings
    #[must_use]
    pub fn new(
        pid: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            pid: pid.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            stateless: false,
            settings_schema: Vec::new(),
            capabilities: Vec::new(),
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the stateless flag
    #[must_use]
    pub fn with_stateless(mut self, stateless: bool) -> Self {
        self.stateless = stateless;
        self
    }

    /// Add a setting to the schema
    #[must_use]
    pub fn with_setting(mut self, setting: SettingSpec) -> Self {
        self.settings_schema.push(setting);
        self
    }

    /// Add a capability tag
    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }
}

/// Optional capability: custom dependency validation
pub trait DependencyCheck: Send + Sync {
    /// Return a list of problems; empty means the dependencies are satisfied
    fn validate_dependencies(&self) -> Vec<String>;
}

/// Optional capability: agent initialization and cleanup hooks
#[async_trait::async_trait]
pub trait AgentLifecycle: Send + Sync {
    /// Called once with the resolved settings before tools are collected
    async fn initialize(&self, settings: &ResolvedSettings) -> Result<()>;

    /// Called when the bundle holding the agent is released
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// A plugin agent: the object that owns a plugin's tools
pub trait PluginAgent: Send + Sync {
    /// SDK-neutral tool list
    fn tools(&self) -> Vec<ToolSpec>;

    /// Lifecycle hooks, if the agent has any
    fn lifecycle(&self) -> Option<&dyn AgentLifecycle> {
        None
    }
}

/// A plugin implementation
pub trait Plugin: Send + Sync {
    /// Static metadata
    fn metadata(&self) -> &PluginMetadata;

    /// Instantiate a fresh agent
    fn create_agent(&self) -> Result<Box<dyn PluginAgent>>;

    /// Custom dependency check, if the plugin has one
    fn dependency_check(&self) -> Option<&dyn DependencyCheck> {
        None
    }
}

/// A resolved plugin: what the catalog hands to the factory
#[derive(Clone)]
pub struct PluginContract {
    plugin: Arc<dyn Plugin>,
}

impl PluginContract {
    /// Wrap a plugin implementation
    #[must_use]
    pub fn new(plugin: Arc<dyn Plugin>) -> Self {
        Self { plugin }
    }

    /// Plugin identifier
    #[must_use]
    pub fn pid(&self) -> &str {
        &self.plugin.metadata().pid
    }

    /// Plugin version
    #[must_use]
    pub fn version(&self) -> &str {
        &self.plugin.metadata().version
    }

    /// Whether bundles of this plugin may be shared
    #[must_use]
    pub fn is_stateless(&self) -> bool {
        self.plugin.metadata().stateless
    }

    /// Static metadata
    #[must_use]
    pub fn metadata(&self) -> &PluginMetadata {
        self.plugin.metadata()
    }

    /// Underlying plugin
    #[must_use]
    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    /// `pid@version` label for logs
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}@{}", self.pid(), self.version())
    }
}

impl std::fmt::Debug for PluginContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContract")
            .field("pid", &self.pid())
            .field("version", &self.version())
            .field("stateless", &self.is_stateless())
            .finish()
    }
}

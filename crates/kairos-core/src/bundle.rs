//! Bundle - Compiling one plugin into one instance
//!
//! [`BundleBuilder::build`] runs the full pipeline:
//! 1. Instantiate the plugin agent
//! 2. Resolve settings (schema defaults + instance overrides)
//! 3. Run the agent's initialization hook, if it has one
//! 4. Collect the neutral tool list
//! 5. Convert tools with the adapter
//! 6. Bind a model when the settings name one (via the model cache)
//! 7. Build the tool-execution node when the backend needs it
//! 8. Assemble the bundle
//!
//! Nothing is visible to the instance until the whole pipeline succeeds.
//! [`BundleBuilder::build_with_cache`] routes stateless plugins through the
//! bundle cache so identical effective configurations share one bundle.

use crate::adapter::{BoundModel, ExecutionNode, NativeTool, OrchestratorAdapter};
use crate::cache::SharedResource;
use crate::error::{Error, Result};
use crate::resources::{BundleKey, ModelLease, SharedResources};
use kairos_llm::{ModelProvider, ModelSettings};
use kairos_plugins::{
    settings_fingerprint, PluginAgent, PluginContract, PluginMetadata, ResolvedSettings,
    SettingsResolver, ToolSpec,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// One plugin compiled against one adapter and one resolved settings map
pub struct PluginBundle {
    metadata: PluginMetadata,
    adapter_kind: String,
    settings: ResolvedSettings,
    tools: Vec<ToolSpec>,
    native_tools: Vec<NativeTool>,
    model: Option<BoundModel>,
    model_lease: Option<ModelLease>,
    execution_node: Option<ExecutionNode>,
    agent: Box<dyn PluginAgent>,
}

impl PluginBundle {
    /// Plugin identifier
    #[must_use]
    pub fn pid(&self) -> &str {
        &self.metadata.pid
    }

    /// Plugin version
    #[must_use]
    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Plugin metadata
    #[must_use]
    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// Adapter kind the bundle was compiled for
    #[must_use]
    pub fn adapter_kind(&self) -> &str {
        &self.adapter_kind
    }

    /// Resolved settings
    #[must_use]
    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    /// Neutral tools
    #[must_use]
    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    /// Backend-native tools
    #[must_use]
    pub fn native_tools(&self) -> &[NativeTool] {
        &self.native_tools
    }

    /// Bound model, if the plugin named its own model
    #[must_use]
    pub fn model(&self) -> Option<&BoundModel> {
        self.model.as_ref()
    }

    /// Tool-execution node, if the backend needs one
    #[must_use]
    pub fn execution_node(&self) -> Option<&ExecutionNode> {
        self.execution_node.as_ref()
    }

    /// The plugin agent
    #[must_use]
    pub fn agent(&self) -> &dyn PluginAgent {
        self.agent.as_ref()
    }

    /// `pid@version` label for logs
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}@{}", self.metadata.pid, self.metadata.version)
    }
}

#[async_trait::async_trait]
impl SharedResource for PluginBundle {
    /// Run the agent's cleanup hook, then return the nested model reference
    async fn release(&self) -> Result<()> {
        let cleanup = match self.agent.lifecycle() {
            Some(lifecycle) => lifecycle.cleanup().await.map_err(Error::from),
            None => Ok(()),
        };

        if let Some(lease) = &self.model_lease {
            lease.release().await;
        }

        debug!(plugin = %self.label(), "Released plugin bundle");
        cleanup
    }
}

impl fmt::Debug for PluginBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBundle")
            .field("plugin", &self.label())
            .field("adapter_kind", &self.adapter_kind)
            .field("tools", &self.tools.len())
            .field("model", &self.model)
            .field("execution_node", &self.execution_node)
            .finish()
    }
}

/// Result of [`BundleBuilder::build_with_cache`]
#[derive(Debug, Clone)]
pub struct BuiltBundle {
    /// The bundle
    pub bundle: Arc<PluginBundle>,
    /// Cache key when the bundle is shared (one reference is held for it)
    pub lease: Option<BundleKey>,
    /// Whether the bundle came from the cache
    pub from_cache: bool,
}

/// Builds plugin bundles for one tenant and one adapter
#[derive(Clone)]
pub struct BundleBuilder {
    tenant_id: String,
    adapter: Arc<dyn OrchestratorAdapter>,
    provider: Arc<dyn ModelProvider>,
    resources: Arc<SharedResources>,
}

impl BundleBuilder {
    /// Create a builder
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        adapter: Arc<dyn OrchestratorAdapter>,
        provider: Arc<dyn ModelProvider>,
        resources: Arc<SharedResources>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            adapter,
            provider,
            resources,
        }
    }

    /// Adapter used for tool conversion
    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn OrchestratorAdapter> {
        &self.adapter
    }

    /// Build a fresh bundle
    pub async fn build(
        &self,
        contract: &PluginContract,
        resolver: &SettingsResolver,
    ) -> Result<PluginBundle> {
        let metadata = contract.metadata().clone();
        let agent = contract.plugin().create_agent()?;

        let settings = resolver.resolve(
            &metadata.pid,
            &metadata.version,
            &metadata.settings_schema,
        )?;

        if let Some(lifecycle) = agent.lifecycle() {
            lifecycle.initialize(&settings).await?;
        }

        let tools = agent.tools();
        let native_tools: Vec<NativeTool> =
            tools.iter().map(|t| self.adapter.native_tool(t)).collect();

        let (model, model_lease) = match self.bind_model(&settings, &native_tools).await {
            Ok(bound) => bound,
            Err(e) => {
                // The agent was initialized; give it a chance to undo that
                if let Some(lifecycle) = agent.lifecycle() {
                    if let Err(cleanup_err) = lifecycle.cleanup().await {
                        error!(plugin = %contract.label(), error = %cleanup_err, "Agent cleanup failed after build error");
                    }
                }
                return Err(e);
            }
        };

        let execution_node = self
            .adapter
            .requires_execution_node()
            .then(|| self.adapter.execution_node(&metadata.pid, &native_tools));

        debug!(
            plugin = %contract.label(),
            tenant = %self.tenant_id,
            tools = tools.len(),
            has_model = model.is_some(),
            "Built plugin bundle"
        );

        Ok(PluginBundle {
            metadata,
            adapter_kind: self.adapter.kind().to_string(),
            settings,
            tools,
            native_tools,
            model,
            model_lease,
            execution_node,
            agent,
        })
    }

    async fn bind_model(
        &self,
        settings: &ResolvedSettings,
        native_tools: &[NativeTool],
    ) -> Result<(Option<BoundModel>, Option<ModelLease>)> {
        // No model named: the plugin uses the instance's top-level model
        let Some(model_settings) = ModelSettings::from_settings(settings)? else {
            return Ok((None, None));
        };

        let lease = ModelLease::acquire(
            Arc::clone(&self.resources.models),
            self.provider.as_ref(),
            &self.tenant_id,
            &model_settings,
        )
        .await?;
        let bound = self
            .adapter
            .bind_tools(Arc::clone(lease.client()), native_tools);
        Ok((Some(bound), Some(lease)))
    }

    /// Build a bundle, sharing it through the bundle cache when the plugin is stateless
    pub async fn build_with_cache(
        &self,
        contract: &PluginContract,
        resolver: &SettingsResolver,
    ) -> Result<BuiltBundle> {
        if !contract.is_stateless() {
            let bundle = self.build(contract, resolver).await?;
            return Ok(BuiltBundle {
                bundle: Arc::new(bundle),
                lease: None,
                from_cache: false,
            });
        }

        let metadata = contract.metadata();
        let settings =
            resolver.resolve(&metadata.pid, &metadata.version, &metadata.settings_schema)?;
        let key = BundleKey {
            plugin_id: metadata.pid.clone(),
            version: metadata.version.clone(),
            settings_fingerprint: settings_fingerprint(&settings),
            adapter_kind: self.adapter.kind().to_string(),
        };

        let (bundle, from_cache) = self
            .resources
            .bundles
            .get_or_create(key.clone(), || async {
                self.build(contract, resolver).await.map(Arc::new)
            })
            .await?;

        if from_cache {
            info!(plugin = %contract.label(), tenant = %self.tenant_id, "Reusing cached bundle");
        }

        Ok(BuiltBundle {
            bundle,
            lease: Some(key),
            from_cache,
        })
    }
}

impl fmt::Debug for BundleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleBuilder")
            .field("tenant_id", &self.tenant_id)
            .field("adapter", &self.adapter.kind())
            .finish()
    }
}

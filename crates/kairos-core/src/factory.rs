//! Factory - Builds orchestrator instances from their records
//!
//! The factory owns the `(backend, mode)` registry. For a record it:
//! 1. Looks up the backend components (unknown pairs are a configuration error)
//! 2. Constructs the adapter and a plugin manager bound to it
//! 3. Resolves, validates and loads every active plugin
//! 4. Acquires the top-level model through the model cache
//! 5. Compiles (or fetches from the template cache) the execution template
//! 6. Constructs engine and stream wrapper, assembles and initializes the instance
//!
//! A failed build returns every shared reference it took. So does a build
//! whose future is dropped midway: references are recorded in a
//! [`LeaseGuard`] as they are taken.

use crate::backends::{builtin_backends, BackendComponents};
use crate::bundle::BundleBuilder;
use crate::config::FactoryConfig;
use crate::error::{Error, Result};
use crate::instance::{InstanceParts, InstanceRecord, OrchestratorInstance};
use crate::plugin_manager::PluginManager;
use crate::resources::{LeaseGuard, SharedResources, TemplateKey};
use crate::template::ExecutionTemplate;
use kairos_llm::{ModelClient, ModelProvider};
use kairos_plugins::{ContractValidator, PluginCatalog, PluginSpec, SettingsResolver};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Registry and builder of orchestrator instances
pub struct InstanceFactory {
    registry: RwLock<BTreeMap<(String, String), BackendComponents>>,
    catalog: Arc<dyn PluginCatalog>,
    provider: Arc<dyn ModelProvider>,
    resources: Arc<SharedResources>,
    validator: ContractValidator,
    config: FactoryConfig,
}

impl InstanceFactory {
    /// Create a factory with the built-in backends registered
    #[must_use]
    pub fn new(
        catalog: Arc<dyn PluginCatalog>,
        provider: Arc<dyn ModelProvider>,
        resources: Arc<SharedResources>,
    ) -> Self {
        let registry = builtin_backends()
            .into_iter()
            .map(|(backend, mode, components)| ((backend.to_string(), mode.to_string()), components))
            .collect();
        Self {
            registry: RwLock::new(registry),
            catalog,
            provider,
            resources,
            validator: ContractValidator::new(),
            config: FactoryConfig::default(),
        }
    }

    /// Set the factory configuration
    #[must_use]
    pub fn with_config(mut self, config: FactoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Shared caches the factory builds into
    #[must_use]
    pub fn resources(&self) -> &Arc<SharedResources> {
        &self.resources
    }

    /// Register (or replace) the components of a `(backend, mode)` pair.
    ///
    /// Returns the components previously registered for the pair.
    pub fn register_backend(
        &self,
        backend: impl Into<String>,
        mode: impl Into<String>,
        components: BackendComponents,
    ) -> Option<BackendComponents> {
        let pair = (backend.into(), mode.into());
        info!(backend = %pair.0, mode = %pair.1, "Registered backend");
        self.registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pair, components)
    }

    /// Registered `(backend, mode)` pairs, sorted
    #[must_use]
    pub fn list_supported_backends(&self) -> Vec<(String, String)> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Whether a pair is registered
    #[must_use]
    pub fn supports(&self, backend: &str, mode: &str) -> bool {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&(backend.to_string(), mode.to_string()))
    }

    fn components(&self, backend: &str, mode: &str) -> Result<BackendComponents> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        match registry.get(&(backend.to_string(), mode.to_string())) {
            Some(components) => Ok(components.clone()),
            None => Err(Error::UnsupportedBackend {
                backend: backend.to_string(),
                mode: mode.to_string(),
                supported: registry.keys().map(|(b, m)| format!("{}/{}", b, m)).collect(),
            }),
        }
    }

    /// Build and initialize an instance for `record`
    pub async fn create(&self, record: &InstanceRecord) -> Result<OrchestratorInstance> {
        let started = Instant::now();
        let key = record.key();
        let components = self.components(&record.backend, &record.mode)?;

        let adapter = (components.adapter)();
        let builder = BundleBuilder::new(
            record.tenant_id.clone(),
            Arc::clone(&adapter),
            Arc::clone(&self.provider),
            Arc::clone(&self.resources),
        );
        let mut plugins = PluginManager::new(
            record.tenant_id.clone(),
            builder,
            SettingsResolver::new(record.plugin_settings.clone()),
        );
        let mut guard = LeaseGuard::new(Arc::clone(&self.resources));

        let shared = match self
            .acquire(record, &components, &mut plugins, &mut guard)
            .await
        {
            Ok(shared) => shared,
            Err(e) => {
                plugins.release_stateful().await;
                guard.release().await;
                warn!(instance = %key, error = %e, "Instance build failed");
                return Err(e);
            }
        };

        let mut instance = OrchestratorInstance::new(InstanceParts {
            key: key.clone(),
            backend: record.backend.clone(),
            mode: record.mode.clone(),
            adapter,
            plugins,
            template: shared.template,
            model: shared.model,
            settings: record.settings.clone(),
            engine: (components.engine)(&record.mode),
            wrapper: (components.wrapper)(),
            leases: guard.leases().clone(),
            config_hash: record.config_hash(),
        });

        if let Err(e) = instance.initialize().await {
            instance.cleanup().await;
            guard.release().await;
            warn!(instance = %key, error = %e, "Instance initialization failed");
            return Err(e);
        }
        guard.disarm();

        info!(
            instance = %key,
            backend = %record.backend,
            mode = %record.mode,
            plugins = instance.plugins().len(),
            shared_refs = instance.leases().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Instance created"
        );
        Ok(instance)
    }

    async fn acquire(
        &self,
        record: &InstanceRecord,
        components: &BackendComponents,
        plugins: &mut PluginManager,
        guard: &mut LeaseGuard,
    ) -> Result<AcquiredShared> {
        for spec in &record.active_plugins {
            match self.load_plugin(spec, plugins).await {
                Ok(_) => guard.leases_mut().bundles = plugins.shared_bundle_keys(),
                Err(e) if self.config.require_all_plugins => return Err(e),
                Err(e) => {
                    warn!(tenant = %record.tenant_id, plugin = %spec, error = %e, "Skipping plugin that failed to load");
                }
            }
        }

        let model = match &record.model {
            Some(settings) => {
                let (client, key, _) = self
                    .resources
                    .models
                    .acquire(self.provider.as_ref(), &record.tenant_id, settings)
                    .await?;
                guard.leases_mut().models.push(key);
                Some(client)
            }
            None => None,
        };

        let template = match components.template {
            Some(spec) => {
                let key = TemplateKey::new(
                    record.backend.clone(),
                    record.mode.clone(),
                    plugins.plugin_ids(),
                );
                if spec.shared {
                    let (template, _) = self
                        .resources
                        .templates
                        .get_or_create(key.clone(), || async { (spec.compiler)(&key).map(Arc::new) })
                        .await?;
                    guard.leases_mut().templates.push(key);
                    Some(template)
                } else {
                    Some(Arc::new((spec.compiler)(&key)?))
                }
            }
            None => None,
        };

        Ok(AcquiredShared { model, template })
    }

    async fn load_plugin(&self, spec: &str, plugins: &mut PluginManager) -> Result<bool> {
        let spec = PluginSpec::parse(spec)?;
        let contract = self
            .catalog
            .resolve(&spec.pid, spec.version.as_deref())
            .await?;

        if plugins.is_loaded(contract.pid(), contract.version()) {
            debug!(plugin = %contract.label(), "Plugin already loaded, skipping");
            return Ok(false);
        }

        self.validator.validate(&contract)?;
        plugins.load(&contract).await
    }
}

struct AcquiredShared {
    model: Option<Arc<dyn ModelClient>>,
    template: Option<Arc<ExecutionTemplate>>,
}

impl std::fmt::Debug for InstanceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceFactory")
            .field("backends", &self.list_supported_backends())
            .field("config", &self.config)
            .finish()
    }
}

//! Plugin manager - The plugins loaded into one instance
//!
//! One manager exists per tenant instance, bound to that instance's adapter.
//! It owns every bundle the instance loaded: shared (stateless) bundles are
//! tracked by their cache key, stateful bundles are owned outright and
//! released when the instance is cleaned up.

use crate::bundle::{BundleBuilder, PluginBundle};
use crate::cache::SharedResource;
use crate::error::Result;
use crate::resources::BundleKey;
use kairos_plugins::{PluginContract, SettingsResolver, ToolSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

struct LoadedBundle {
    bundle: Arc<PluginBundle>,
    lease: Option<BundleKey>,
}

/// Plugins loaded into one instance, keyed by `(pid, version)`
pub struct PluginManager {
    tenant_id: String,
    builder: BundleBuilder,
    resolver: SettingsResolver,
    loaded: BTreeMap<(String, String), LoadedBundle>,
}

impl PluginManager {
    /// Create a manager for one tenant instance
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        builder: BundleBuilder,
        resolver: SettingsResolver,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            builder,
            resolver,
            loaded: BTreeMap::new(),
        }
    }

    /// Whether `(pid, version)` is loaded
    #[must_use]
    pub fn is_loaded(&self, pid: &str, version: &str) -> bool {
        self.loaded
            .contains_key(&(pid.to_string(), version.to_string()))
    }

    /// Build and register a plugin's bundle.
    ///
    /// Returns false without building when the exact `(pid, version)` is
    /// already loaded.
    pub async fn load(&mut self, contract: &PluginContract) -> Result<bool> {
        let id = (contract.pid().to_string(), contract.version().to_string());
        if self.loaded.contains_key(&id) {
            debug!(plugin = %contract.label(), "Plugin already loaded, skipping");
            return Ok(false);
        }

        let built = self
            .builder
            .build_with_cache(contract, &self.resolver)
            .await?;
        info!(
            plugin = %contract.label(),
            tenant = %self.tenant_id,
            shared = built.lease.is_some(),
            from_cache = built.from_cache,
            "Loaded plugin"
        );
        self.loaded.insert(
            id,
            LoadedBundle {
                bundle: built.bundle,
                lease: built.lease,
            },
        );
        Ok(true)
    }

    /// Loaded plugin ids, sorted and deduplicated
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.loaded.keys().map(|(pid, _)| pid.clone()).collect();
        ids.dedup();
        ids
    }

    /// Loaded bundles in `(pid, version)` order
    pub fn bundles(&self) -> impl Iterator<Item = &Arc<PluginBundle>> {
        self.loaded.values().map(|loaded| &loaded.bundle)
    }

    /// Bundle for a plugin id (highest loaded version)
    #[must_use]
    pub fn bundle(&self, pid: &str) -> Option<&Arc<PluginBundle>> {
        self.loaded
            .iter()
            .rev()
            .find(|((loaded_pid, _), _)| loaded_pid == pid)
            .map(|(_, loaded)| &loaded.bundle)
    }

    /// Every neutral tool across the loaded plugins
    #[must_use]
    pub fn tools(&self) -> Vec<ToolSpec> {
        self.bundles()
            .flat_map(|bundle| bundle.tools().iter().cloned())
            .collect()
    }

    /// Cache keys of the shared bundles this instance holds references to
    #[must_use]
    pub fn shared_bundle_keys(&self) -> Vec<BundleKey> {
        self.loaded
            .values()
            .filter_map(|loaded| loaded.lease.clone())
            .collect()
    }

    /// Number of loaded plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    /// Whether no plugin is loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Release the bundles this instance owns outright.
    ///
    /// Shared bundles stay registered; their references are returned through
    /// the bundle cache by whoever holds the instance's leases.
    pub async fn release_stateful(&mut self) {
        let owned: Vec<_> = std::mem::take(&mut self.loaded)
            .into_iter()
            .filter(|(_, loaded)| loaded.lease.is_none())
            .collect();

        for ((pid, version), loaded) in owned {
            if let Err(e) = loaded.bundle.release().await {
                error!(plugin = %pid, version = %version, error = %e, "Failed to release plugin bundle");
            }
        }
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("tenant_id", &self.tenant_id)
            .field("plugins", &self.loaded.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AgentsAdapter;
    use crate::resources::SharedResources;
    use kairos_llm::LocalModelProvider;
    use kairos_plugins::{EchoPlugin, ScratchpadPlugin, ECHO_PID, SCRATCHPAD_PID};

    fn manager(resources: &Arc<SharedResources>) -> PluginManager {
        let builder = BundleBuilder::new(
            "acme",
            Arc::new(AgentsAdapter),
            Arc::new(LocalModelProvider::permissive()),
            Arc::clone(resources),
        );
        PluginManager::new("acme", builder, SettingsResolver::default())
    }

    #[tokio::test]
    async fn test_load_skips_duplicates() {
        let resources = Arc::new(SharedResources::new());
        let mut manager = manager(&resources);
        let echo = PluginContract::new(Arc::new(EchoPlugin::new()));

        assert!(manager.load(&echo).await.unwrap());
        assert!(!manager.load(&echo).await.unwrap());
        assert_eq!(manager.len(), 1);
        assert!(manager.is_loaded(ECHO_PID, "1.0.0"));
        assert_eq!(resources.bundles.stats().total_refs, 1);
    }

    #[tokio::test]
    async fn test_release_stateful_leaves_shared_refs() {
        let resources = Arc::new(SharedResources::new());
        let mut manager = manager(&resources);
        manager
            .load(&PluginContract::new(Arc::new(EchoPlugin::new())))
            .await
            .unwrap();
        manager
            .load(&PluginContract::new(Arc::new(ScratchpadPlugin::new())))
            .await
            .unwrap();

        assert_eq!(manager.plugin_ids(), vec![ECHO_PID, SCRATCHPAD_PID]);
        assert_eq!(manager.shared_bundle_keys().len(), 1);
        assert_eq!(manager.tools().len(), 3);

        let shared = manager.shared_bundle_keys();
        manager.release_stateful().await;
        assert!(manager.is_empty());
        assert_eq!(resources.bundles.stats().total_refs, 1);

        assert!(resources.bundles.decrement_ref(&shared[0]).await);
        assert!(resources.bundles.is_empty());
    }
}

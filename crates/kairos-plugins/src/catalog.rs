//! Catalog - Resolution of plugin ids to concrete contracts

use crate::contract::{Plugin, PluginContract, PluginMetadata};
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Plugin lookup used by the instance factory
#[async_trait::async_trait]
pub trait PluginCatalog: Send + Sync {
    /// Resolve a plugin id, optionally pinned to a version.
    ///
    /// Without a version the highest registered version is returned.
    async fn resolve(&self, pid: &str, version: Option<&str>) -> Result<PluginContract>;

    /// Metadata of every registered plugin version
    async fn list(&self) -> Vec<PluginMetadata>;
}

/// Compare dotted version strings segment by segment.
///
/// Numeric segments compare numerically; anything else falls back to string
/// order. Missing segments count as `0`, so `1.0` equals `1.0.0`.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = a.split('.').collect();
    let right: Vec<&str> = b.split('.').collect();

    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).copied().unwrap_or("0");
        let r = right.get(i).copied().unwrap_or("0");
        let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// In-process plugin catalog
#[derive(Default)]
pub struct InMemoryPluginCatalog {
    plugins: RwLock<HashMap<String, BTreeMap<String, PluginContract>>>,
}

impl InMemoryPluginCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing an existing registration of the same version
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        let contract = PluginContract::new(plugin);
        info!(plugin = %contract.label(), stateless = contract.is_stateless(), "Registered plugin");

        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        plugins
            .entry(contract.pid().to_string())
            .or_default()
            .insert(contract.version().to_string(), contract);
    }

    /// Builder-style registration
    #[must_use]
    pub fn with_plugin(self, plugin: Arc<dyn Plugin>) -> Self {
        self.register(plugin);
        self
    }

    /// Number of registered plugin versions
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(BTreeMap::len)
            .sum()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl PluginCatalog for InMemoryPluginCatalog {
    async fn resolve(&self, pid: &str, version: Option<&str>) -> Result<PluginContract> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        let versions = plugins
            .get(pid)
            .ok_or_else(|| Error::NotFound(pid.to_string()))?;

        let contract = match version {
            Some(v) => versions
                .get(v)
                .ok_or_else(|| Error::NotFound(format!("{}@{}", pid, v)))?,
            None => versions
                .values()
                .max_by(|a, b| compare_versions(a.version(), b.version()))
                .ok_or_else(|| Error::NotFound(pid.to_string()))?,
        };

        debug!(plugin = %contract.label(), "Resolved plugin");
        Ok(contract.clone())
    }

    async fn list(&self) -> Vec<PluginMetadata> {
        let plugins = self.plugins.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<PluginMetadata> = plugins
            .values()
            .flat_map(|versions| versions.values().map(|c| c.metadata().clone()))
            .collect();
        all.sort_by(|a, b| {
            a.pid
                .cmp(&b.pid)
                .then_with(|| compare_versions(&a.version, &b.version))
        });
        all
    }
}

#[cfg(test)]
mod tests;

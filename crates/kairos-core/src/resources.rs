//! Shared resources - The three cache instantiations and their keys
//!
//! | Cache | Key | Shared when |
//! |---|---|---|
//! | [`BundleCache`] | plugin id, version, settings fingerprint, adapter kind | the plugin is stateless |
//! | [`ModelCache`] | model config id, model name, temperature, max tokens | always |
//! | [`TemplateCache`] | backend, mode, sorted plugin ids | the backend's templates are tenant-invariant |
//!
//! [`SharedResources`] owns all three and is constructed once by the
//! application context, then torn down with [`SharedResources::cleanup`].

use crate::bundle::PluginBundle;
use crate::cache::{CacheStats, SharedResource, SharedResourceCache};
use crate::error::Result;
use crate::template::ExecutionTemplate;
use kairos_llm::{ModelClient, ModelProvider, ModelSettings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

// ============================================================================
// Keys
// ============================================================================

/// Identity of a shareable plugin bundle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleKey {
    /// Plugin identifier
    pub plugin_id: String,
    /// Plugin version
    pub version: String,
    /// Fingerprint of the resolved settings
    pub settings_fingerprint: String,
    /// Adapter kind the bundle was compiled for
    pub adapter_kind: String,
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}#{}[{}]",
            self.plugin_id, self.version, self.settings_fingerprint, self.adapter_kind
        )
    }
}

/// Identity of a shared model client
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    /// Model configuration identifier
    pub config_id: String,
    /// Model name
    pub model_name: String,
    /// Temperature as IEEE-754 bits (`-0.0` normalized to `0.0`)
    pub temperature_bits: u64,
    /// Response token limit
    pub max_tokens: u32,
}

impl ModelKey {
    /// Temperature as a float
    #[must_use]
    pub fn temperature(&self) -> f64 {
        f64::from_bits(self.temperature_bits)
    }
}

impl From<&ModelSettings> for ModelKey {
    fn from(settings: &ModelSettings) -> Self {
        let temperature = if settings.temperature == 0.0 {
            0.0
        } else {
            settings.temperature
        };
        Self {
            config_id: settings.config_id.clone(),
            model_name: settings.model_name.clone(),
            temperature_bits: temperature.to_bits(),
            max_tokens: settings.max_tokens,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (t={}, max={})",
            self.config_id,
            self.model_name,
            self.temperature(),
            self.max_tokens
        )
    }
}

/// Identity of a shareable execution template
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateKey {
    /// Backend kind
    pub backend: String,
    /// Orchestration mode
    pub mode: String,
    /// Sorted, deduplicated plugin ids
    pub plugin_ids: Vec<String>,
}

impl TemplateKey {
    /// Create a key; plugin ids are sorted and deduplicated
    #[must_use]
    pub fn new(
        backend: impl Into<String>,
        mode: impl Into<String>,
        plugin_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut plugin_ids: Vec<String> = plugin_ids.into_iter().collect();
        plugin_ids.sort();
        plugin_ids.dedup();
        Self {
            backend: backend.into(),
            mode: mode.into(),
            plugin_ids,
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}]", self.backend, self.mode, self.plugin_ids.join(","))
    }
}

// ============================================================================
// Caches
// ============================================================================

/// Cache of stateless plugin bundles
pub type BundleCache = SharedResourceCache<BundleKey, PluginBundle>;

/// Cache of bound model clients
pub type ModelCache = SharedResourceCache<ModelKey, dyn ModelClient>;

/// Cache of compiled execution templates
pub type TemplateCache = SharedResourceCache<TemplateKey, ExecutionTemplate>;

#[async_trait::async_trait]
impl SharedResource for dyn ModelClient {
    async fn release(&self) -> Result<()> {
        self.close().await?;
        Ok(())
    }
}

impl SharedResourceCache<ModelKey, dyn ModelClient> {
    /// Get or construct the client for `settings`, taking a reference
    pub async fn acquire(
        &self,
        provider: &dyn ModelProvider,
        tenant_id: &str,
        settings: &ModelSettings,
    ) -> Result<(Arc<dyn ModelClient>, ModelKey, bool)> {
        let key = ModelKey::from(settings);
        let (client, cached) = self
            .get_or_create(key.clone(), || async {
                let client = provider.create_model(tenant_id, settings).await?;
                Ok::<_, crate::error::Error>(client)
            })
            .await?;
        Ok((client, key, cached))
    }
}

/// A model reference owned by a plugin bundle.
///
/// Released exactly once, when the owning bundle is released.
pub struct ModelLease {
    cache: Arc<ModelCache>,
    key: ModelKey,
    client: Arc<dyn ModelClient>,
    released: AtomicBool,
}

impl ModelLease {
    /// Acquire a model through the cache
    pub async fn acquire(
        cache: Arc<ModelCache>,
        provider: &dyn ModelProvider,
        tenant_id: &str,
        settings: &ModelSettings,
    ) -> Result<Self> {
        let (client, key, _) = cache.acquire(provider, tenant_id, settings).await?;
        Ok(Self {
            cache,
            key,
            client,
            released: AtomicBool::new(false),
        })
    }

    /// The leased client
    #[must_use]
    pub fn client(&self) -> &Arc<dyn ModelClient> {
        &self.client
    }

    /// The cache key
    #[must_use]
    pub fn key(&self) -> &ModelKey {
        &self.key
    }

    /// Return the reference to the cache. Later calls do nothing.
    pub async fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.cache.decrement_ref(&self.key).await;
        }
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let key = self.key.clone();
        warn!(model = %key, "Model lease dropped unreleased, returning reference");
        release_detached(async move {
            cache.decrement_ref(&key).await;
        });
    }
}

impl fmt::Debug for ModelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLease")
            .field("key", &self.key)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// Leases and the owning context
// ============================================================================

/// Shared-cache references held by one materialized instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SharedLeases {
    /// Shared plugin bundles
    pub bundles: Vec<BundleKey>,
    /// Top-level model
    pub models: Vec<ModelKey>,
    /// Shared execution template
    pub templates: Vec<TemplateKey>,
}

impl SharedLeases {
    /// Whether no references are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty() && self.models.is_empty() && self.templates.is_empty()
    }

    /// Total number of references held
    #[must_use]
    pub fn len(&self) -> usize {
        self.bundles.len() + self.models.len() + self.templates.len()
    }
}

/// Run a release on the current runtime without waiting for it.
///
/// Used from `Drop`, where the async release cannot be awaited.
pub(crate) fn release_detached(release: impl Future<Output = ()> + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(release);
        }
        Err(_) => error!("No runtime available, shared references were not returned"),
    }
}

/// References taken by a build that has not finished.
///
/// Every reference is recorded here the moment it is taken. Dropped while
/// still armed (the build future was cancelled), the guard returns them on a
/// spawned task; [`disarm`](Self::disarm) hands them to the finished holder.
#[must_use]
pub struct LeaseGuard {
    resources: Arc<SharedResources>,
    leases: SharedLeases,
    armed: bool,
}

impl LeaseGuard {
    /// Start tracking references taken from `resources`
    pub fn new(resources: Arc<SharedResources>) -> Self {
        Self {
            resources,
            leases: SharedLeases::default(),
            armed: true,
        }
    }

    /// Track references already held, e.g. by an instance not yet installed
    pub fn holding(resources: Arc<SharedResources>, leases: SharedLeases) -> Self {
        Self {
            resources,
            leases,
            armed: true,
        }
    }

    /// References tracked so far
    #[must_use]
    pub fn leases(&self) -> &SharedLeases {
        &self.leases
    }

    /// Mutable access for recording newly taken references
    pub fn leases_mut(&mut self) -> &mut SharedLeases {
        &mut self.leases
    }

    /// Return every tracked reference now
    pub async fn release(mut self) {
        self.armed = false;
        let leases = std::mem::take(&mut self.leases);
        self.resources.release(&leases).await;
    }

    /// Stop tracking; the references now belong to the caller
    pub fn disarm(mut self) -> SharedLeases {
        self.armed = false;
        std::mem::take(&mut self.leases)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed || self.leases.is_empty() {
            return;
        }
        let leases = std::mem::take(&mut self.leases);
        let resources = Arc::clone(&self.resources);
        warn!(references = leases.len(), "Build abandoned, returning shared references");
        release_detached(async move {
            resources.release(&leases).await;
        });
    }
}

impl fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("leases", &self.leases)
            .field("armed", &self.armed)
            .finish()
    }
}

/// Snapshot of the three caches
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SharedResourceStats {
    /// Bundle cache
    pub bundles: CacheStats,
    /// Model cache
    pub models: CacheStats,
    /// Template cache
    pub templates: CacheStats,
}

/// The three shared caches, owned by the application context
#[derive(Debug, Clone)]
pub struct SharedResources {
    /// Stateless plugin bundles
    pub bundles: Arc<BundleCache>,
    /// Model clients
    pub models: Arc<ModelCache>,
    /// Execution templates
    pub templates: Arc<TemplateCache>,
}

impl Default for SharedResources {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedResources {
    /// Create empty caches
    #[must_use]
    pub fn new() -> Self {
        Self {
            bundles: Arc::new(BundleCache::new("bundles")),
            models: Arc::new(ModelCache::new("models")),
            templates: Arc::new(TemplateCache::new("templates")),
        }
    }

    /// Add one reference for every lease
    pub fn retain(&self, leases: &SharedLeases) {
        for key in &leases.bundles {
            self.bundles.increment_ref(key);
        }
        for key in &leases.models {
            self.models.increment_ref(key);
        }
        for key in &leases.templates {
            self.templates.increment_ref(key);
        }
    }

    /// Drop one reference for every lease
    pub async fn release(&self, leases: &SharedLeases) {
        for key in &leases.bundles {
            self.bundles.decrement_ref(key).await;
        }
        for key in &leases.models {
            self.models.decrement_ref(key).await;
        }
        for key in &leases.templates {
            self.templates.decrement_ref(key).await;
        }
    }

    /// Hand the references from one holder to the next.
    ///
    /// The incoming holder's references are taken before the outgoing holder's
    /// are dropped, so no entry passes through zero.
    pub async fn transfer(&self, leases: &SharedLeases) {
        self.retain(leases);
        self.release(leases).await;
        debug!(references = leases.len(), "Transferred shared references");
    }

    /// Statistics of all three caches
    #[must_use]
    pub fn stats(&self) -> SharedResourceStats {
        SharedResourceStats {
            bundles: self.bundles.stats(),
            models: self.models.stats(),
            templates: self.templates.stats(),
        }
    }

    /// Force-drain every cache.
    ///
    /// Bundles go first so their nested model references are returned before
    /// the model cache is drained.
    pub async fn cleanup(&self) {
        self.bundles.cleanup().await;
        self.templates.cleanup().await;
        self.models.cleanup().await;
    }
}

#[cfg(test)]
mod tests;

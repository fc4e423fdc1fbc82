//! Pool - Hot / Warm / Cold tiers of orchestrator instances
//!
//! ## Tiers
//!
//! - **Hot**: materialized, bounded by `max_hot_instances`, ordered by recency
//! - **Warm**: materialized, unbounded, each entry carries an absolute expiry
//! - **Cold**: not materialized; only the store's record exists
//!
//! ## Transitions
//!
//! | From | Trigger | To |
//! |---|---|---|
//! | Hot | access | Hot (recency refreshed) |
//! | Hot | capacity pressure, [`InstancePool::evict`] | Warm |
//! | Warm | access | Hot (demoting the LRU Hot entry when full) |
//! | Warm | expiry + sweep | Cold (instance torn down) |
//! | Cold / unknown | access | Hot (full factory build) |
//!
//! ## Shared references
//!
//! A tier membership owns one reference per shared bundle, model and template
//! of its instance. Hot↔Warm moves hand the references over (increment, then
//! decrement) so counts never pass through zero. Warm→Cold, removal and
//! shutdown return them.

use crate::cache::{CacheStats, KeyedLock};
use crate::config::PoolConfig;
use crate::engine::StreamEvent;
use crate::error::{Error, Result};
use crate::factory::InstanceFactory;
use crate::instance::{InstanceHealthDetail, InstanceKey, InstanceRecord, OrchestratorInstance};
use crate::resources::{LeaseGuard, SharedLeases, SharedResources};
use crate::store::InstanceStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Estimated private footprint of a materialized instance
pub const INSTANCE_BYTES_ESTIMATE: u64 = 2 * 1024 * 1024;
/// Estimated footprint of a Cold record
pub const COLD_BYTES_ESTIMATE: u64 = 100;
/// Estimated footprint of a shared model client
pub const MODEL_BYTES_ESTIMATE: u64 = 5 * 1024 * 1024;
/// Estimated footprint of a shared plugin bundle
pub const BUNDLE_BYTES_ESTIMATE: u64 = 512 * 1024;
/// Estimated footprint of a shared execution template
pub const TEMPLATE_BYTES_ESTIMATE: u64 = 64 * 1024;

/// Tier of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Materialized, counted against capacity
    Hot,
    /// Materialized, waiting for reuse or expiry
    Warm,
    /// Not materialized
    Cold,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Hot => write!(f, "hot"),
            Tier::Warm => write!(f, "warm"),
            Tier::Cold => write!(f, "cold"),
        }
    }
}

// ============================================================================
// Pooled instance
// ============================================================================

/// A materialized instance as handed out by the pool.
///
/// Rebuild-in-place swaps the inner instance; callers holding the `Arc` see
/// the new configuration on their next call.
pub struct PooledInstance {
    key: InstanceKey,
    inner: RwLock<OrchestratorInstance>,
    leases: Mutex<SharedLeases>,
    retired: AtomicBool,
}

impl PooledInstance {
    fn new(instance: OrchestratorInstance) -> Self {
        Self {
            key: instance.key().clone(),
            leases: Mutex::new(instance.leases().clone()),
            inner: RwLock::new(instance),
            retired: AtomicBool::new(false),
        }
    }

    /// Instance key
    #[must_use]
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Read access to the current instance
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, OrchestratorInstance> {
        self.inner.read().await
    }

    /// Run one request
    pub async fn invoke(&self, prompt: &str) -> Result<Vec<StreamEvent>> {
        self.inner.read().await.invoke(prompt).await
    }

    /// Readiness report
    pub async fn health_check(&self) -> InstanceHealthDetail {
        self.inner.read().await.health_check().await
    }

    /// Shared-cache references held by the current instance
    #[must_use]
    pub fn leases(&self) -> SharedLeases {
        self.leases.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swap in a rebuilt instance. A torn-down slot refuses it and hands it back.
    async fn replace(
        &self,
        instance: OrchestratorInstance,
    ) -> std::result::Result<OrchestratorInstance, OrchestratorInstance> {
        let mut inner = self.inner.write().await;
        if self.retired.load(Ordering::SeqCst) {
            return Err(instance);
        }
        let leases = instance.leases().clone();
        let old = std::mem::replace(&mut *inner, instance);
        *self.leases.lock().unwrap_or_else(|e| e.into_inner()) = leases;
        Ok(old)
    }

    async fn teardown(&self, resources: &SharedResources) {
        let mut inner = self.inner.write().await;
        self.retired.store(true, Ordering::SeqCst);
        inner.teardown(resources).await;
    }
}

impl fmt::Debug for PooledInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledInstance")
            .field("key", &self.key)
            .field("leases", &self.leases())
            .finish()
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Health status of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Ready to serve
    Healthy,
    /// Not ready, failed or timed out
    Unhealthy,
}

/// Health check result for one instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceHealth {
    /// Tier at check time
    pub tier: Tier,
    /// Status
    pub status: HealthStatus,
    /// Instance report, absent on timeout
    pub detail: Option<InstanceHealthDetail>,
    /// Failure description
    pub error: Option<String>,
    /// Check time
    pub checked_at: DateTime<Utc>,
}

impl InstanceHealth {
    /// Whether the instance is healthy
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Instances across all tiers
    pub total_instances: usize,
    /// Hot tier size
    pub hot_count: usize,
    /// Warm tier size
    pub warm_count: usize,
    /// Cold (swept) instances
    pub cold_count: usize,
    /// Shared model clients
    pub shared_model_count: usize,
    /// Shared plugin bundles
    pub shared_bundle_count: usize,
    /// Shared execution templates
    pub shared_template_count: usize,
    /// Bundle cache references
    pub bundle_cache: CacheStats,
    /// Model cache references
    pub model_cache: CacheStats,
    /// Template cache references
    pub template_cache: CacheStats,
    /// Derived memory estimate in MB
    pub memory_estimate_mb: f64,
    /// Snapshot time
    pub generated_at: DateTime<Utc>,
}

/// Result of a prewarm run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrewarmSummary {
    /// Instances requested
    pub requested: usize,
    /// Instances now materialized
    pub loaded: usize,
    /// Instances that failed to build
    pub failed: usize,
}

// ============================================================================
// Pool
// ============================================================================

struct HotEntry {
    instance: Arc<PooledInstance>,
    last_access: Instant,
}

struct WarmEntry {
    instance: Arc<PooledInstance>,
    expires_at: Instant,
}

#[derive(Default)]
struct TierState {
    hot: HashMap<InstanceKey, HotEntry>,
    warm: HashMap<InstanceKey, WarmEntry>,
    cold: HashSet<InstanceKey>,
    hashes: HashMap<InstanceKey, String>,
}

impl TierState {
    fn materialized(&self, key: &InstanceKey) -> Option<(Arc<PooledInstance>, Tier)> {
        if let Some(entry) = self.hot.get(key) {
            return Some((Arc::clone(&entry.instance), Tier::Hot));
        }
        self.warm
            .get(key)
            .map(|entry| (Arc::clone(&entry.instance), Tier::Warm))
    }
}

/// Tiered pool of orchestrator instances
pub struct InstancePool {
    config: PoolConfig,
    factory: Arc<InstanceFactory>,
    store: Arc<dyn InstanceStore>,
    resources: Arc<SharedResources>,
    state: Mutex<TierState>,
    build_locks: DashMap<InstanceKey, Arc<tokio::sync::Mutex<()>>>,
}

impl InstancePool {
    /// Create a pool; the configuration is validated
    pub fn new(
        config: PoolConfig,
        factory: Arc<InstanceFactory>,
        store: Arc<dyn InstanceStore>,
    ) -> Result<Self> {
        config.validate()?;
        let resources = Arc::clone(factory.resources());
        Ok(Self {
            config,
            factory,
            store,
            resources,
            state: Mutex::new(TierState::default()),
            build_locks: DashMap::new(),
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TierState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pool configuration
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Instance factory
    #[must_use]
    pub fn factory(&self) -> &Arc<InstanceFactory> {
        &self.factory
    }

    /// Configuration store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    /// Shared caches
    #[must_use]
    pub fn resources(&self) -> &Arc<SharedResources> {
        &self.resources
    }

    /// Current tier of `key`; `None` when the pool has never seen it
    #[must_use]
    pub fn tier(&self, key: &InstanceKey) -> Option<Tier> {
        let state = self.lock_state();
        match state.materialized(key) {
            Some((_, tier)) => Some(tier),
            None => state.cold.contains(key).then_some(Tier::Cold),
        }
    }

    /// Config hash of the record a materialized instance was built from
    #[must_use]
    pub fn config_hash(&self, key: &InstanceKey) -> Option<String> {
        self.lock_state().hashes.get(key).cloned()
    }

    /// Every instance the pool knows about with its tier, sorted by key
    #[must_use]
    pub fn list_instances(&self) -> Vec<(InstanceKey, Tier)> {
        let state = self.lock_state();
        let mut all: Vec<(InstanceKey, Tier)> = state
            .hot
            .keys()
            .map(|k| (k.clone(), Tier::Hot))
            .chain(state.warm.keys().map(|k| (k.clone(), Tier::Warm)))
            .chain(state.cold.iter().map(|k| (k.clone(), Tier::Cold)))
            .collect();
        all.sort();
        all
    }

    /// Get a ready instance, promoting or building it as needed
    pub async fn get(&self, key: &InstanceKey) -> Result<Arc<PooledInstance>> {
        if let Some(instance) = self.lookup(key).await {
            return Ok(instance);
        }

        self.with_build_lock(key, async {
            // Another caller may have built it while we waited
            if let Some(instance) = self.lookup(key).await {
                return Ok(instance);
            }
            let record = self
                .store
                .get(key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("instance {}", key)))?;
            info!(instance = %key, "Cold miss, building instance");
            self.install(record).await
        })
        .await
    }

    /// Build `record` straight into Hot.
    ///
    /// Fails with [`Error::AlreadyExists`] when the instance is present in any
    /// tier, Cold included.
    pub async fn create_instance(&self, record: InstanceRecord) -> Result<Arc<PooledInstance>> {
        let key = record.key();
        self.with_build_lock(&key, async {
            let present = {
                let state = self.lock_state();
                state.materialized(&key).is_some() || state.cold.contains(&key)
            };
            if present {
                return Err(Error::AlreadyExists(key.to_string()));
            }
            self.install(record).await
        })
        .await
    }

    async fn with_build_lock<T>(
        &self,
        key: &InstanceKey,
        work: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let slot = KeyedLock::new(&self.build_locks, key.clone());
        let _guard = slot.lock().await;
        work.await
    }

    /// Tear down on a spawned task so a cancelled caller cannot strand references
    async fn teardown_detached(&self, instances: Vec<Arc<PooledInstance>>) {
        if instances.is_empty() {
            return;
        }
        let resources = Arc::clone(&self.resources);
        let task = tokio::spawn(async move {
            for instance in &instances {
                instance.teardown(&resources).await;
            }
        });
        if let Err(e) = task.await {
            error!(error = %e, "Instance teardown task failed");
        }
    }

    async fn retire_detached(&self, instance: OrchestratorInstance) {
        let resources = Arc::clone(&self.resources);
        let task = tokio::spawn(async move {
            let mut instance = instance;
            instance.teardown(&resources).await;
        });
        if let Err(e) = task.await {
            error!(error = %e, "Instance teardown task failed");
        }
    }

    fn is_current(&self, key: &InstanceKey, pooled: &Arc<PooledInstance>) -> bool {
        matches!(
            self.lock_state().materialized(key),
            Some((current, _)) if Arc::ptr_eq(&current, pooled)
        )
    }

    /// Hot hit or Warm promotion; `None` when the instance is not materialized
    async fn lookup(&self, key: &InstanceKey) -> Option<Arc<PooledInstance>> {
        let (instance, handed_over) = {
            let mut state = self.lock_state();
            if let Some(entry) = state.hot.get_mut(key) {
                entry.last_access = Instant::now();
                debug!(instance = %key, "Hot hit");
                return Some(Arc::clone(&entry.instance));
            }

            let warm = state.warm.remove(key)?;
            let mut handed_over = self.make_room(&mut state);
            state.hot.insert(
                key.clone(),
                HotEntry {
                    instance: Arc::clone(&warm.instance),
                    last_access: Instant::now(),
                },
            );
            info!(instance = %key, hot = state.hot.len(), "Promoted warm instance to hot");
            handed_over.push(Arc::clone(&warm.instance));
            (warm.instance, handed_over)
        };

        self.hand_over(&handed_over).await;
        Some(instance)
    }

    /// Demote LRU Hot entries until one slot is free; returns the demoted instances
    fn make_room(&self, state: &mut TierState) -> Vec<Arc<PooledInstance>> {
        let mut demoted = Vec::new();
        while state.hot.len() >= self.config.max_hot_instances {
            let Some(lru) = state
                .hot
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            if let Some(entry) = state.hot.remove(&lru) {
                warn!(instance = %lru, capacity = self.config.max_hot_instances, "Hot tier full, demoting LRU instance to warm");
                state.warm.insert(
                    lru,
                    WarmEntry {
                        instance: Arc::clone(&entry.instance),
                        expires_at: Instant::now() + self.config.warm_ttl(),
                    },
                );
                demoted.push(entry.instance);
            }
        }
        demoted
    }

    /// The new tier membership takes its references before the old one drops them
    async fn hand_over(&self, instances: &[Arc<PooledInstance>]) {
        for instance in instances {
            self.resources.transfer(&instance.leases()).await;
        }
    }

    async fn install(&self, record: InstanceRecord) -> Result<Arc<PooledInstance>> {
        let key = record.key();
        let config_hash = record.config_hash();
        let pooled = Arc::new(PooledInstance::new(self.factory.create(&record).await?));

        let demoted = {
            let mut state = self.lock_state();
            let demoted = self.make_room(&mut state);
            state.cold.remove(&key);
            state.hot.insert(
                key.clone(),
                HotEntry {
                    instance: Arc::clone(&pooled),
                    last_access: Instant::now(),
                },
            );
            state.hashes.insert(key.clone(), config_hash);
            demoted
        };
        self.hand_over(&demoted).await;

        info!(instance = %key, "Instance placed in hot tier");
        Ok(pooled)
    }

    /// Rebuild a materialized instance from the store's current record.
    ///
    /// Returns false when the instance is Cold (the next access builds the new
    /// configuration anyway). Unknown instances are [`Error::NotFound`].
    pub async fn reload(&self, key: &InstanceKey) -> Result<bool> {
        let record = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("instance {}", key)))?;
        self.reload_with(record).await
    }

    /// Rebuild a materialized instance from `record`, keeping tier and identity.
    ///
    /// The old instance keeps serving if the rebuild fails. Returns false when
    /// the instance is not materialized.
    pub async fn reload_with(&self, record: InstanceRecord) -> Result<bool> {
        let key = record.key();
        self.with_build_lock(&key, async {
            let materialized = self.lock_state().materialized(&key);
            let Some((pooled, tier)) = materialized else {
                debug!(instance = %key, "Reload skipped, instance not materialized");
                return Ok(false);
            };

            let rebuilt = self.factory.create(&record).await?;
            let guard = LeaseGuard::holding(Arc::clone(&self.resources), rebuilt.leases().clone());

            // Removed or swept while the rebuild ran
            if !self.is_current(&key, &pooled) {
                guard.disarm();
                self.retire_detached(rebuilt).await;
                info!(instance = %key, "Instance left the pool during rebuild, discarding");
                return Ok(false);
            }

            let old = match pooled.replace(rebuilt).await {
                Ok(old) => old,
                Err(rebuilt) => {
                    guard.disarm();
                    self.retire_detached(rebuilt).await;
                    info!(instance = %key, "Instance torn down during rebuild, discarding");
                    return Ok(false);
                }
            };
            guard.disarm();
            self.retire_detached(old).await;

            {
                let mut state = self.lock_state();
                let current = matches!(
                    state.materialized(&key),
                    Some((current, _)) if Arc::ptr_eq(&current, &pooled)
                );
                if current {
                    state.hashes.insert(key.clone(), record.config_hash());
                }
            }
            info!(instance = %key, tier = %tier, "Instance rebuilt in place");
            Ok(true)
        })
        .await
    }

    /// Tear an instance down from any tier
    pub async fn remove(&self, key: &InstanceKey) -> Result<()> {
        let (removed, was_cold) = {
            let mut state = self.lock_state();
            state.hashes.remove(key);
            let removed = match state.hot.remove(key) {
                Some(entry) => Some(entry.instance),
                None => state.warm.remove(key).map(|entry| entry.instance),
            };
            (removed, state.cold.remove(key))
        };

        match removed {
            Some(instance) => {
                self.teardown_detached(vec![instance]).await;
                info!(instance = %key, "Instance removed");
                Ok(())
            }
            None if was_cold => Ok(()),
            None => Err(Error::NotFound(format!("instance {}", key))),
        }
    }

    /// Demote a Hot instance to Warm. Returns false when it already was Warm.
    pub async fn evict(&self, key: &InstanceKey) -> Result<bool> {
        let demoted = {
            let mut state = self.lock_state();
            match state.hot.remove(key) {
                Some(entry) => {
                    state.warm.insert(
                        key.clone(),
                        WarmEntry {
                            instance: Arc::clone(&entry.instance),
                            expires_at: Instant::now() + self.config.warm_ttl(),
                        },
                    );
                    entry.instance
                }
                None if state.warm.contains_key(key) => return Ok(false),
                None => return Err(Error::NotFound(format!("instance {}", key))),
            }
        };

        self.hand_over(std::slice::from_ref(&demoted)).await;
        info!(instance = %key, "Instance demoted to warm");
        Ok(true)
    }

    /// Move every expired Warm entry to Cold; returns how many moved
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<PooledInstance>> = {
            let mut state = self.lock_state();
            let keys: Vec<InstanceKey> = state
                .warm
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(key, _)| key.clone())
                .collect();

            keys.into_iter()
                .filter_map(|key| {
                    let entry = state.warm.remove(&key)?;
                    state.hashes.remove(&key);
                    state.cold.insert(key);
                    Some(entry.instance)
                })
                .collect()
        };

        for instance in &expired {
            info!(instance = %instance.key(), "Warm instance expired to cold");
        }
        let count = expired.len();
        self.teardown_detached(expired).await;
        count
    }

    /// Health-check every Hot (and optionally Warm) instance concurrently.
    ///
    /// Each check is bounded by the configured timeout; a slow or failing
    /// instance only affects its own entry.
    pub async fn health_check_all(&self) -> BTreeMap<InstanceKey, InstanceHealth> {
        let targets: Vec<(InstanceKey, Tier, Arc<PooledInstance>)> = {
            let state = self.lock_state();
            let hot = state
                .hot
                .iter()
                .map(|(k, e)| (k.clone(), Tier::Hot, Arc::clone(&e.instance)));
            let warm = state
                .warm
                .iter()
                .filter(|_| self.config.health_check_warm)
                .map(|(k, e)| (k.clone(), Tier::Warm, Arc::clone(&e.instance)));
            hot.chain(warm).collect()
        };

        let timeout = self.config.health_check_timeout();
        let checks = targets.into_iter().map(|(key, tier, instance)| async move {
            let health = match tokio::time::timeout(timeout, instance.health_check()).await {
                Ok(detail) => InstanceHealth {
                    tier,
                    status: if detail.ready {
                        HealthStatus::Healthy
                    } else {
                        HealthStatus::Unhealthy
                    },
                    error: if detail.ready {
                        None
                    } else {
                        Some(detail.detail.clone().unwrap_or_else(|| "not ready".to_string()))
                    },
                    detail: Some(detail),
                    checked_at: Utc::now(),
                },
                Err(_) => InstanceHealth {
                    tier,
                    status: HealthStatus::Unhealthy,
                    detail: None,
                    error: Some(Error::Timeout(timeout.as_millis() as u64).to_string()),
                    checked_at: Utc::now(),
                },
            };
            if !health.is_healthy() {
                warn!(instance = %key, tier = %tier, error = ?health.error, "Instance unhealthy");
            }
            (key, health)
        });

        join_all(checks).await.into_iter().collect()
    }

    /// Tier counts, shared cache statistics and a memory estimate
    #[must_use]
    pub fn get_stats(&self) -> PoolStats {
        let (hot_count, warm_count, cold_count) = {
            let state = self.lock_state();
            (state.hot.len(), state.warm.len(), state.cold.len())
        };
        let shared = self.resources.stats();

        let bytes = (hot_count + warm_count) as u64 * INSTANCE_BYTES_ESTIMATE
            + cold_count as u64 * COLD_BYTES_ESTIMATE
            + shared.models.entries as u64 * MODEL_BYTES_ESTIMATE
            + shared.bundles.entries as u64 * BUNDLE_BYTES_ESTIMATE
            + shared.templates.entries as u64 * TEMPLATE_BYTES_ESTIMATE;
        let memory_estimate_mb = (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;

        PoolStats {
            total_instances: hot_count + warm_count + cold_count,
            hot_count,
            warm_count,
            cold_count,
            shared_model_count: shared.models.entries,
            shared_bundle_count: shared.bundles.entries,
            shared_template_count: shared.templates.entries,
            bundle_cache: shared.bundles,
            model_cache: shared.models,
            template_cache: shared.templates,
            memory_estimate_mb,
            generated_at: Utc::now(),
        }
    }

    /// Load instances into Hot; failures are logged and counted
    pub async fn prewarm(&self, keys: &[InstanceKey]) -> PrewarmSummary {
        let mut summary = PrewarmSummary {
            requested: keys.len(),
            ..PrewarmSummary::default()
        };
        for key in keys {
            match self.get(key).await {
                Ok(_) => summary.loaded += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(instance = %key, error = %e, "Prewarm failed");
                }
            }
        }
        info!(
            requested = summary.requested,
            loaded = summary.loaded,
            failed = summary.failed,
            "Prewarm finished"
        );
        summary
    }

    /// Prewarm every instance the store knows
    pub async fn prewarm_all(&self) -> Result<PrewarmSummary> {
        let keys = self.store.list().await?;
        Ok(self.prewarm(&keys).await)
    }

    /// Tear down every materialized instance and drain the shared caches
    pub async fn shutdown(&self) {
        let instances: Vec<Arc<PooledInstance>> = {
            let mut state = std::mem::take(&mut *self.lock_state());
            state
                .hot
                .drain()
                .map(|(_, e)| e.instance)
                .chain(state.warm.drain().map(|(_, e)| e.instance))
                .collect()
        };

        for instance in &instances {
            instance.teardown(&self.resources).await;
        }
        self.resources.cleanup().await;
        info!(instances = instances.len(), "Instance pool shut down");
    }
}

impl fmt::Debug for InstancePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("InstancePool")
            .field("hot", &state.hot.len())
            .field("warm", &state.warm.len())
            .field("cold", &state.cold.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Run the Warm tier sweep every `interval` until `token` is cancelled
pub fn spawn_sweeper(
    pool: Arc<InstancePool>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Warm tier sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let swept = pool.sweep_expired().await;
                    if swept > 0 {
                        info!(swept, "Swept expired warm instances");
                    }
                }
                _ = token.cancelled() => {
                    info!("Warm tier sweeper shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests;

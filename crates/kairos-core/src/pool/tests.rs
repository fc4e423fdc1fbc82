use super::*;
use crate::adapter::{AgentsAdapter, OrchestratorAdapter};
use crate::backends::{AgentsStreamWrapper, BackendComponents};
use crate::engine::{EngineContext, EngineHealth, ExecutionEngine, ExecutionWrapper};
use crate::error::ErrorKind;
use crate::store::{InMemoryInstanceStore, MockInstanceStore};
use kairos_llm::{LocalModelProvider, ModelProvider, ModelSettings};
use kairos_plugins::{register_builtins, InMemoryPluginCatalog, ECHO_PID, SCRATCHPAD_PID};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

struct Harness {
    pool: Arc<InstancePool>,
    store: Arc<InMemoryInstanceStore>,
    provider: Arc<LocalModelProvider>,
}

fn factory(provider: &Arc<LocalModelProvider>) -> Arc<InstanceFactory> {
    let catalog = InMemoryPluginCatalog::new();
    register_builtins(&catalog);
    Arc::new(InstanceFactory::new(
        Arc::new(catalog),
        Arc::clone(provider) as Arc<dyn ModelProvider>,
        Arc::new(SharedResources::new()),
    ))
}

fn harness_with(config: PoolConfig, provider: LocalModelProvider) -> Harness {
    let provider = Arc::new(provider);
    let store = Arc::new(InMemoryInstanceStore::new());
    let pool = InstancePool::new(config, factory(&provider), store.clone()).unwrap();
    Harness {
        pool: Arc::new(pool),
        store,
        provider,
    }
}

fn harness(config: PoolConfig) -> Harness {
    harness_with(config, LocalModelProvider::permissive())
}

fn echo_record(instance_id: &str) -> InstanceRecord {
    InstanceRecord::new("acme", instance_id, "agents", "supervisor").with_plugin(ECHO_PID)
}

fn key(instance_id: &str) -> InstanceKey {
    InstanceKey::new("acme", instance_id)
}

impl Harness {
    fn seed(&self, records: impl IntoIterator<Item = InstanceRecord>) {
        for record in records {
            self.store.upsert(record);
        }
    }
}

#[test]
fn test_new_rejects_invalid_config() {
    let provider = Arc::new(LocalModelProvider::permissive());
    let result = InstancePool::new(
        PoolConfig::default().with_max_hot_instances(0),
        factory(&provider),
        Arc::new(InMemoryInstanceStore::new()),
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_cold_miss_builds_into_hot() {
    let h = harness(PoolConfig::default());
    h.seed([echo_record("a")]);

    let first = h.pool.get(&key("a")).await.unwrap();
    let second = h.pool.get(&key("a")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Hot));
    assert_eq!(
        h.pool.config_hash(&key("a")),
        Some(echo_record("a").config_hash())
    );

    let events = first.invoke("hello").await.unwrap();
    assert!(matches!(events.last(), Some(StreamEvent::Message { content, .. }) if content == "hello"));
}

#[tokio::test]
async fn test_unknown_instance_is_not_found() {
    let h = harness(PoolConfig::default());
    let err = h.pool.get(&key("missing")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.pool.tier(&key("missing")).is_none());
}

#[tokio::test]
async fn test_store_is_consulted_once_per_build() {
    let mut store = MockInstanceStore::new();
    store
        .expect_get()
        .withf(|k| k.instance_id == "a")
        .times(1)
        .returning(|_| Ok(Some(echo_record("a"))));

    let provider = Arc::new(LocalModelProvider::permissive());
    let pool = InstancePool::new(PoolConfig::default(), factory(&provider), Arc::new(store)).unwrap();

    pool.get(&key("a")).await.unwrap();
    pool.get(&key("a")).await.unwrap();
}

#[tokio::test]
async fn test_store_failure_propagates() {
    let mut store = MockInstanceStore::new();
    store
        .expect_get()
        .returning(|_| Err(Error::Internal("store offline".to_string())));

    let provider = Arc::new(LocalModelProvider::permissive());
    let pool = InstancePool::new(PoolConfig::default(), factory(&provider), Arc::new(store)).unwrap();

    let err = pool.get(&key("a")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[tokio::test]
async fn test_concurrent_gets_build_once() {
    let h = harness_with(
        PoolConfig::default(),
        LocalModelProvider::permissive().with_build_delay(Duration::from_millis(20)),
    );
    h.seed([echo_record("a").with_model(ModelSettings::new("cfg-1"))]);

    let (first, second) = (key("a"), key("a"));
    let (a, b) = tokio::join!(h.pool.get(&first), h.pool.get(&second));
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(h.provider.created_count(), 1);
    assert_eq!(h.pool.resources().models.stats().total_refs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_hot_capacity_demotes_least_recently_used() {
    let h = harness(PoolConfig::default().with_max_hot_instances(2));
    h.seed([echo_record("a"), echo_record("b"), echo_record("c")]);

    h.pool.get(&key("a")).await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    h.pool.get(&key("b")).await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    h.pool.get(&key("a")).await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    h.pool.get(&key("c")).await.unwrap();

    let stats = h.pool.get_stats();
    assert_eq!(stats.hot_count, 2);
    assert_eq!(stats.warm_count, 1);
    assert_eq!(h.pool.tier(&key("b")), Some(Tier::Warm));
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Hot));
}

#[tokio::test(start_paused = true)]
async fn test_warm_promotion_keeps_shared_references() {
    let h = harness(PoolConfig::default().with_max_hot_instances(1));
    h.seed([echo_record("a"), echo_record("b")]);

    let a = h.pool.get(&key("a")).await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    h.pool.get(&key("b")).await.unwrap();
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Warm));

    let bundles = &h.pool.resources().bundles;
    assert_eq!(bundles.stats().entries, 1);
    assert_eq!(bundles.stats().total_refs, 2);

    tokio::time::advance(Duration::from_secs(1)).await;
    let promoted = h.pool.get(&key("a")).await.unwrap();
    assert!(Arc::ptr_eq(&a, &promoted));
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Hot));
    assert_eq!(h.pool.tier(&key("b")), Some(Tier::Warm));
    assert_eq!(bundles.stats().total_refs, 2);
}

#[tokio::test(start_paused = true)]
async fn test_warm_expiry_moves_to_cold() {
    let h = harness(
        PoolConfig::default()
            .with_max_hot_instances(1)
            .with_warm_ttl(Duration::from_secs(60)),
    );
    h.seed([echo_record("a"), echo_record("b")]);

    h.pool.get(&key("a")).await.unwrap();
    h.pool.get(&key("b")).await.unwrap();

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(h.pool.sweep_expired().await, 0);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(h.pool.sweep_expired().await, 1);

    let stats = h.pool.get_stats();
    assert_eq!(stats.warm_count, 0);
    assert_eq!(stats.cold_count, 1);
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Cold));
    assert!(h.pool.config_hash(&key("a")).is_none());
    assert_eq!(h.pool.resources().bundles.stats().total_refs, 1);

    // Access rebuilds from the store
    h.pool.get(&key("a")).await.unwrap();
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Hot));
    assert_eq!(h.pool.get_stats().cold_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_task_runs_until_cancelled() {
    let h = harness(PoolConfig::default().with_warm_ttl(Duration::from_secs(1)));
    h.seed([echo_record("a")]);
    h.pool.get(&key("a")).await.unwrap();
    assert!(h.pool.evict(&key("a")).await.unwrap());

    let token = CancellationToken::new();
    let handle = spawn_sweeper(Arc::clone(&h.pool), Duration::from_secs(10), token.clone());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Cold));

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_evict() {
    let h = harness(PoolConfig::default());
    h.seed([echo_record("a")]);
    h.pool.get(&key("a")).await.unwrap();

    assert!(h.pool.evict(&key("a")).await.unwrap());
    assert!(!h.pool.evict(&key("a")).await.unwrap());
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Warm));
    assert_eq!(h.pool.resources().bundles.stats().total_refs, 1);
    assert!(matches!(
        h.pool.evict(&key("missing")).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reload_rebuilds_in_place() {
    let h = harness(PoolConfig::default());
    h.seed([echo_record("a")]);
    let pooled = h.pool.get(&key("a")).await.unwrap();
    let old_hash = h.pool.config_hash(&key("a")).unwrap();

    let updated = echo_record("a").with_plugin_settings(ECHO_PID, json!({ "prefix": ">" }));
    h.store.upsert(updated.clone());
    assert!(h.pool.reload(&key("a")).await.unwrap());

    let again = h.pool.get(&key("a")).await.unwrap();
    assert!(Arc::ptr_eq(&pooled, &again));
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Hot));
    assert_ne!(h.pool.config_hash(&key("a")).unwrap(), old_hash);

    let instance = pooled.read().await;
    let bundle = instance.plugins().bundle(ECHO_PID).unwrap();
    assert_eq!(bundle.settings()["prefix"], json!(">"));
    drop(instance);

    // The old fingerprint's bundle was released
    assert_eq!(h.pool.resources().bundles.stats().entries, 1);
    assert_eq!(h.pool.resources().bundles.stats().total_refs, 1);
}

#[tokio::test]
async fn test_failed_reload_keeps_old_instance() {
    let h = harness(PoolConfig::default());
    h.seed([echo_record("a")]);
    let pooled = h.pool.get(&key("a")).await.unwrap();
    let hash = h.pool.config_hash(&key("a"));

    let broken = echo_record("a").with_plugin("io.kairos.missing");
    assert!(h.pool.reload_with(broken).await.is_err());

    assert_eq!(h.pool.config_hash(&key("a")), hash);
    assert!(pooled.invoke("still here").await.is_ok());
    assert_eq!(h.pool.resources().bundles.stats().total_refs, 1);
}

#[tokio::test]
async fn test_reload_of_unmaterialized_instances() {
    let h = harness(PoolConfig::default());
    h.seed([echo_record("a")]);

    assert!(!h.pool.reload(&key("a")).await.unwrap());
    assert!(matches!(
        h.pool.reload(&key("missing")).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_remove_releases_everything() {
    let h = harness(PoolConfig::default());
    h.seed([echo_record("a")
        .with_plugin(SCRATCHPAD_PID)
        .with_model(ModelSettings::new("cfg-1"))]);
    h.pool.get(&key("a")).await.unwrap();
    assert_eq!(h.pool.resources().models.len(), 1);

    h.pool.remove(&key("a")).await.unwrap();
    assert!(h.pool.tier(&key("a")).is_none());
    assert!(h.pool.resources().models.is_empty());
    assert!(h.pool.resources().bundles.is_empty());
    assert!(matches!(
        h.pool.remove(&key("a")).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_create_instance_rejects_duplicates() {
    let h = harness(PoolConfig::default());
    h.pool.create_instance(echo_record("a")).await.unwrap();

    let err = h.pool.create_instance(echo_record("a")).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
    assert_eq!(h.pool.resources().bundles.stats().total_refs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_instance_rejects_cold_instances() {
    let h = harness(
        PoolConfig::default()
            .with_max_hot_instances(1)
            .with_warm_ttl(Duration::from_secs(1)),
    );
    h.seed([echo_record("a"), echo_record("b")]);
    h.pool.get(&key("a")).await.unwrap();
    h.pool.get(&key("b")).await.unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(h.pool.sweep_expired().await, 1);
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Cold));

    let err = h.pool.create_instance(echo_record("a")).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
    assert_eq!(h.pool.tier(&key("a")), Some(Tier::Cold));
    assert_eq!(h.pool.resources().bundles.stats().total_refs, 1);
}

#[tokio::test]
async fn test_identical_settings_share_bundle_across_instances() {
    let h = harness(PoolConfig::default());
    let shared = |id: &str| echo_record(id).with_plugin_settings(ECHO_PID, json!({ "prefix": "v" }));
    h.seed([
        shared("x"),
        shared("y"),
        echo_record("z").with_plugin_settings(ECHO_PID, json!({ "prefix": "other" })),
    ]);

    h.pool.get(&key("x")).await.unwrap();
    h.pool.get(&key("y")).await.unwrap();
    let stats = h.pool.get_stats();
    assert_eq!(stats.shared_bundle_count, 1);
    assert_eq!(stats.bundle_cache.total_refs, 2);

    h.pool.get(&key("z")).await.unwrap();
    let stats = h.pool.get_stats();
    assert_eq!(stats.shared_bundle_count, 2);
    assert_eq!(stats.total_instances, 3);
    assert!(stats.memory_estimate_mb > 0.0);
}

#[tokio::test]
async fn test_prewarm_counts_failures() {
    let h = harness(PoolConfig::default());
    h.seed([
        echo_record("a"),
        echo_record("b"),
        InstanceRecord::new("acme", "broken", "unknown_backend", "supervisor"),
    ]);

    let summary = h.pool.prewarm_all().await.unwrap();
    assert_eq!(
        summary,
        PrewarmSummary {
            requested: 3,
            loaded: 2,
            failed: 1
        }
    );
    assert_eq!(h.pool.list_instances().len(), 2);
}

struct SlowEngine;

#[async_trait::async_trait]
impl ExecutionEngine for SlowEngine {
    fn name(&self) -> &str {
        "slow"
    }

    async fn initialize(&self, _ctx: EngineContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: EngineContext<'_>, _prompt: &str) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }

    async fn health_check(&self, _ctx: EngineContext<'_>) -> EngineHealth {
        tokio::time::sleep(Duration::from_secs(60)).await;
        EngineHealth {
            ready: true,
            detail: None,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_health_check_all_isolates_failures() {
    let h = harness(PoolConfig::default().with_health_check_timeout(Duration::from_secs(5)));
    h.pool.factory().register_backend(
        "slow",
        "supervisor",
        BackendComponents::new(
            || Arc::new(AgentsAdapter) as Arc<dyn OrchestratorAdapter>,
            |_| Box::new(SlowEngine) as Box<dyn ExecutionEngine>,
            || Arc::new(AgentsStreamWrapper) as Arc<dyn ExecutionWrapper>,
        ),
    );
    h.seed([
        echo_record("ok").with_model(ModelSettings::new("cfg-ok")),
        echo_record("closed").with_model(ModelSettings::new("cfg-closed")),
        InstanceRecord::new("acme", "slow", "slow", "supervisor"),
    ]);
    for id in ["ok", "closed", "slow"] {
        h.pool.get(&key(id)).await.unwrap();
    }

    let closed = h.pool.get(&key("closed")).await.unwrap();
    closed.read().await.model().unwrap().close().await.unwrap();

    let report = h.pool.health_check_all().await;
    assert_eq!(report.len(), 3);
    assert!(report[&key("ok")].is_healthy());

    let unhealthy = &report[&key("closed")];
    assert_eq!(unhealthy.status, HealthStatus::Unhealthy);
    assert!(unhealthy.detail.is_some());

    let slow = &report[&key("slow")];
    assert!(!slow.is_healthy());
    assert!(slow.detail.is_none());
    assert!(slow.error.as_deref().unwrap_or_default().contains("timed out"));
}

#[tokio::test]
async fn test_warm_instances_checked_only_when_enabled() {
    let h = harness(PoolConfig::default());
    h.seed([echo_record("a")]);
    h.pool.get(&key("a")).await.unwrap();
    h.pool.evict(&key("a")).await.unwrap();
    assert!(h.pool.health_check_all().await.is_empty());

    let h = harness(PoolConfig::default().with_health_check_warm(true));
    h.seed([echo_record("a")]);
    h.pool.get(&key("a")).await.unwrap();
    h.pool.evict(&key("a")).await.unwrap();
    let report = h.pool.health_check_all().await;
    assert_eq!(report[&key("a")].tier, Tier::Warm);
}

#[tokio::test]
async fn test_shutdown_drains_tiers_and_caches() {
    let h = harness(PoolConfig::default().with_max_hot_instances(1));
    h.seed([
        echo_record("a").with_model(ModelSettings::new("cfg-1")),
        echo_record("b"),
    ]);
    h.pool.get(&key("a")).await.unwrap();
    h.pool.get(&key("b")).await.unwrap();

    h.pool.shutdown().await;

    let stats = h.pool.get_stats();
    assert_eq!(stats.total_instances, 0);
    assert_eq!(stats.shared_bundle_count, 0);
    assert_eq!(stats.shared_model_count, 0);
    assert!(h.pool.list_instances().is_empty());
}

const SLOW_INIT: Duration = Duration::from_secs(10);

struct SlowInitEngine;

#[async_trait::async_trait]
impl ExecutionEngine for SlowInitEngine {
    fn name(&self) -> &str {
        "slow-init"
    }

    async fn initialize(&self, _ctx: EngineContext<'_>) -> Result<()> {
        tokio::time::sleep(SLOW_INIT).await;
        Ok(())
    }

    async fn execute(&self, _ctx: EngineContext<'_>, _prompt: &str) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }

    async fn health_check(&self, _ctx: EngineContext<'_>) -> EngineHealth {
        EngineHealth {
            ready: true,
            detail: None,
        }
    }
}

fn slow_init_harness() -> Harness {
    let h = harness(PoolConfig::default().with_warm_ttl(Duration::from_secs(5)));
    h.pool.factory().register_backend(
        "slow_init",
        "supervisor",
        BackendComponents::new(
            || Arc::new(AgentsAdapter) as Arc<dyn OrchestratorAdapter>,
            |_| Box::new(SlowInitEngine) as Box<dyn ExecutionEngine>,
            || Arc::new(AgentsStreamWrapper) as Arc<dyn ExecutionWrapper>,
        ),
    );
    h.seed([InstanceRecord::new("acme", "s", "slow_init", "supervisor")
        .with_plugin(ECHO_PID)
        .with_plugin(SCRATCHPAD_PID)
        .with_model(ModelSettings::new("cfg-1"))]);
    h
}

/// Let detached release tasks run
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn assert_caches_empty(pool: &InstancePool) {
    let resources = pool.resources();
    assert!(resources.bundles.is_empty(), "{:?}", resources.bundles.stats());
    assert!(resources.models.is_empty(), "{:?}", resources.models.stats());
    assert!(resources.templates.is_empty(), "{:?}", resources.templates.stats());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_build_returns_shared_references() {
    let h = slow_init_harness();

    assert_err!(tokio::time::timeout(Duration::from_secs(1), h.pool.get(&key("s"))).await);
    settle().await;

    assert!(h.pool.list_instances().is_empty());
    assert!(h.pool.build_locks.is_empty());
    assert_caches_empty(&h.pool);

    // A later access builds normally
    assert_ok!(h.pool.get(&key("s")).await);
    assert_eq!(h.pool.tier(&key("s")), Some(Tier::Hot));
    assert_eq!(h.pool.resources().bundles.stats().total_refs, 1);
    assert_eq!(h.pool.resources().models.stats().total_refs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_remove_during_rebuild_discards_the_rebuild() {
    let h = slow_init_harness();
    h.pool.get(&key("s")).await.unwrap();

    let pool = Arc::clone(&h.pool);
    let reload = tokio::spawn(async move { pool.reload(&key("s")).await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.pool.remove(&key("s")).await.unwrap();

    assert!(!reload.await.unwrap().unwrap());
    settle().await;

    assert!(h.pool.list_instances().is_empty());
    assert!(h.pool.config_hash(&key("s")).is_none());
    assert_caches_empty(&h.pool);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_during_rebuild_discards_the_rebuild() {
    let h = slow_init_harness();
    h.pool.get(&key("s")).await.unwrap();
    h.pool.evict(&key("s")).await.unwrap();

    let pool = Arc::clone(&h.pool);
    let reload = tokio::spawn(async move { pool.reload(&key("s")).await });
    // Expires before the rebuild finishes initializing
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.pool.sweep_expired().await, 1);

    assert!(!reload.await.unwrap().unwrap());
    settle().await;

    assert_eq!(h.pool.tier(&key("s")), Some(Tier::Cold));
    assert!(h.pool.config_hash(&key("s")).is_none());
    assert_caches_empty(&h.pool);
}

use super::*;
use crate::config::PoolConfig;
use crate::factory::InstanceFactory;
use crate::instance::InstanceRecord;
use crate::resources::SharedResources;
use crate::store::InMemoryInstanceStore;
use kairos_llm::LocalModelProvider;
use kairos_plugins::{register_builtins, InMemoryPluginCatalog, ECHO_PID};
use serde_json::json;
use std::time::Duration;

fn setup() -> (Arc<InstancePool>, Arc<InMemoryInstanceStore>) {
    let catalog = InMemoryPluginCatalog::new();
    register_builtins(&catalog);
    let factory = InstanceFactory::new(
        Arc::new(catalog),
        Arc::new(LocalModelProvider::permissive()),
        Arc::new(SharedResources::new()),
    );
    let store = Arc::new(InMemoryInstanceStore::with_records([
        record("a"),
        record("b"),
    ]));
    let pool = InstancePool::new(PoolConfig::default(), Arc::new(factory), store.clone()).unwrap();
    (Arc::new(pool), store)
}

fn record(instance_id: &str) -> InstanceRecord {
    InstanceRecord::new("acme", instance_id, "graph", "supervisor").with_plugin(ECHO_PID)
}

fn key(instance_id: &str) -> InstanceKey {
    InstanceKey::new("acme", instance_id)
}

#[test]
fn test_event_wire_format() {
    let event = PoolEvent::Reload {
        key: key("a"),
        config_hash: None,
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(
        value,
        json!({ "type": "reload", "key": { "tenant_id": "acme", "instance_id": "a" } })
    );

    let parsed: PoolEvent =
        serde_json::from_value(json!({ "type": "global_settings_changed" })).unwrap();
    assert_eq!(parsed, PoolEvent::GlobalSettingsChanged);
    assert!(parsed.key().is_none());
}

#[test]
fn test_bus_without_subscribers_drops_events() {
    let bus = PoolEventBus::default();
    assert_eq!(bus.publish(PoolEvent::GlobalSettingsChanged), 0);

    let _rx = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 1);
    assert_eq!(bus.publish(PoolEvent::GlobalSettingsChanged), 1);
}

#[tokio::test]
async fn test_load_is_deduplicated_by_hash() {
    let (pool, _) = setup();
    let event = PoolEvent::Load { key: key("a") };

    assert_eq!(handle_event(&pool, &event).await.unwrap(), EventOutcome::Applied);
    assert_eq!(pool.tier(&key("a")), Some(Tier::Hot));
    assert_eq!(handle_event(&pool, &event).await.unwrap(), EventOutcome::Skipped);
}

#[tokio::test]
async fn test_load_with_changed_record_rebuilds() {
    let (pool, store) = setup();
    let first = pool.get(&key("a")).await.unwrap();
    pool.evict(&key("a")).await.unwrap();

    let updated = record("a").with_plugin_settings(ECHO_PID, json!({ "prefix": "!" }));
    store.upsert(updated.clone());

    let outcome = handle_event(&pool, &PoolEvent::Load { key: key("a") })
        .await
        .unwrap();
    assert_eq!(outcome, EventOutcome::Applied);
    assert_eq!(pool.tier(&key("a")), Some(Tier::Hot));
    assert_eq!(pool.config_hash(&key("a")), Some(updated.config_hash()));
    assert!(Arc::ptr_eq(&first, &pool.get(&key("a")).await.unwrap()));
}

#[tokio::test]
async fn test_reload_skips_current_hash() {
    let (pool, store) = setup();
    pool.get(&key("a")).await.unwrap();
    let current = pool.config_hash(&key("a"));

    let unchanged = PoolEvent::Reload {
        key: key("a"),
        config_hash: current,
    };
    assert_eq!(handle_event(&pool, &unchanged).await.unwrap(), EventOutcome::Skipped);

    let updated = record("a").with_plugin_settings(ECHO_PID, json!({ "prefix": "?" }));
    store.upsert(updated.clone());
    let changed = PoolEvent::Reload {
        key: key("a"),
        config_hash: Some(updated.config_hash()),
    };
    assert_eq!(handle_event(&pool, &changed).await.unwrap(), EventOutcome::Applied);
    assert_eq!(pool.config_hash(&key("a")), Some(updated.config_hash()));

    // Cold instances pick the change up on their next access
    let cold = PoolEvent::Reload {
        key: key("b"),
        config_hash: None,
    };
    assert_eq!(handle_event(&pool, &cold).await.unwrap(), EventOutcome::Skipped);
}

#[tokio::test]
async fn test_unload_and_global_change() {
    let (pool, _) = setup();
    pool.get(&key("a")).await.unwrap();
    pool.get(&key("b")).await.unwrap();

    handle_event(&pool, &PoolEvent::GlobalSettingsChanged)
        .await
        .unwrap();
    assert_eq!(pool.get_stats().hot_count, 2);
    assert_eq!(pool.resources().templates.stats().total_refs, 2);

    handle_event(&pool, &PoolEvent::Unload { key: key("a") })
        .await
        .unwrap();
    assert!(pool.tier(&key("a")).is_none());
    assert!(handle_event(&pool, &PoolEvent::Unload { key: key("a") })
        .await
        .is_err());
}

#[tokio::test]
async fn test_listener_applies_events_and_survives_errors() {
    let (pool, _) = setup();
    let bus = PoolEventBus::new(16);
    let token = CancellationToken::new();
    let handle = spawn_event_listener(Arc::clone(&pool), bus.subscribe(), token.clone());

    bus.publish(PoolEvent::Load { key: key("missing") });
    bus.publish(PoolEvent::Load { key: key("a") });

    tokio::time::timeout(Duration::from_secs(5), async {
        while pool.tier(&key("a")) != Some(Tier::Hot) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_listener_stops_when_bus_closes() {
    let (pool, _) = setup();
    let bus = PoolEventBus::default();
    let handle = spawn_event_listener(pool, bus.subscribe(), CancellationToken::new());

    drop(bus);
    handle.await.unwrap();
}

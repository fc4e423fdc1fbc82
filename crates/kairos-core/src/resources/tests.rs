use super::*;
use kairos_llm::LocalModelProvider;

/// Let detached release tasks run
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[test]
fn test_template_key_sorts_plugin_ids() {
    let a = TemplateKey::new("graph", "supervisor", vec!["b.x".to_string(), "a.x".to_string()]);
    let b = TemplateKey::new(
        "graph",
        "supervisor",
        vec!["a.x".to_string(), "b.x".to_string(), "a.x".to_string()],
    );
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "graph/supervisor[a.x,b.x]");
}

#[test]
fn test_model_key_from_settings() {
    let settings = ModelSettings::new("cfg-1")
        .with_model_name("small")
        .with_temperature(-0.0)
        .with_max_tokens(256);
    let key = ModelKey::from(&settings);
    assert_eq!(key, ModelKey::from(&settings.clone().with_temperature(0.0)));
    assert_eq!(key.temperature(), 0.0);
    assert_eq!(key.to_string(), "cfg-1/small (t=0, max=256)");

    let warmer = ModelKey::from(&settings.with_temperature(0.5));
    assert_ne!(key, warmer);
}

#[tokio::test]
async fn test_model_cache_shares_clients() {
    let resources = SharedResources::new();
    let provider = LocalModelProvider::permissive();
    let settings = ModelSettings::new("cfg-1");

    let (a, key, cached_a) = resources
        .models
        .acquire(&provider, "acme", &settings)
        .await
        .unwrap();
    let (b, _, cached_b) = resources
        .models
        .acquire(&provider, "globex", &settings)
        .await
        .unwrap();

    assert!(!cached_a);
    assert!(cached_b);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(provider.created_count(), 1);
    assert_eq!(resources.models.ref_count(&key), Some(2));
}

#[tokio::test]
async fn test_unknown_model_config_is_not_cached() {
    let resources = SharedResources::new();
    let provider = LocalModelProvider::new();

    let result = resources
        .models
        .acquire(&provider, "acme", &ModelSettings::new("missing"))
        .await;
    assert!(result.is_err());
    assert!(resources.models.is_empty());
}

#[tokio::test]
async fn test_model_lease_releases_once() {
    let resources = SharedResources::new();
    let provider = LocalModelProvider::permissive();
    let settings = ModelSettings::new("cfg-1");

    let lease = ModelLease::acquire(Arc::clone(&resources.models), &provider, "acme", &settings)
        .await
        .unwrap();
    let client = Arc::clone(lease.client());
    assert_eq!(resources.models.ref_count(lease.key()), Some(1));

    lease.release().await;
    lease.release().await;
    assert!(resources.models.is_empty());

    // The release hook closed the client
    assert!(!client.health_check().await.unwrap().healthy);
}

#[tokio::test]
async fn test_dropped_model_lease_returns_its_reference() {
    let resources = SharedResources::new();
    let provider = LocalModelProvider::permissive();

    let lease = ModelLease::acquire(
        Arc::clone(&resources.models),
        &provider,
        "acme",
        &ModelSettings::new("cfg-1"),
    )
    .await
    .unwrap();
    drop(lease);

    settle().await;
    assert!(resources.models.is_empty());
}

#[tokio::test]
async fn test_lease_guard_releases_unless_disarmed() {
    let resources = Arc::new(SharedResources::new());
    let provider = LocalModelProvider::permissive();
    let (_, key, _) = resources
        .models
        .acquire(&provider, "acme", &ModelSettings::new("cfg-1"))
        .await
        .unwrap();

    let mut kept = LeaseGuard::new(Arc::clone(&resources));
    kept.leases_mut().models.push(key.clone());
    let leases = kept.disarm();
    assert_eq!(leases.models, vec![key.clone()]);
    settle().await;
    assert_eq!(resources.models.ref_count(&key), Some(1));

    let abandoned = LeaseGuard::holding(Arc::clone(&resources), leases);
    drop(abandoned);
    settle().await;
    assert!(resources.models.is_empty());
}

#[tokio::test]
async fn test_transfer_keeps_counts() {
    let resources = SharedResources::new();
    let provider = LocalModelProvider::permissive();
    let settings = ModelSettings::new("cfg-1");
    let (_, key, _) = resources
        .models
        .acquire(&provider, "acme", &settings)
        .await
        .unwrap();

    let leases = SharedLeases {
        models: vec![key.clone()],
        ..SharedLeases::default()
    };
    assert_eq!(leases.len(), 1);

    resources.transfer(&leases).await;
    assert_eq!(resources.models.ref_count(&key), Some(1));

    resources.retain(&leases);
    assert_eq!(resources.stats().models.total_refs, 2);

    resources.release(&leases).await;
    resources.release(&leases).await;
    assert!(resources.models.is_empty());
}

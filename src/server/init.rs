//! Application context and main run loop
//!
//! Contains the main `run()` function that starts all pool components.

use super::background_tasks::{start_event_listener, start_health_monitor, start_sweeper};
use super::config::AppConfig;
use super::loader::load_config;
use anyhow::{Context, Result};
use kairos_core::{
    InMemoryInstanceStore, InstanceFactory, InstancePool, PoolEventBus, SharedResources,
};
use kairos_llm::LocalModelProvider;
use kairos_plugins::{register_builtins, InMemoryPluginCatalog};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything the commands share
pub struct AppContext {
    pub catalog: Arc<InMemoryPluginCatalog>,
    pub store: Arc<InMemoryInstanceStore>,
    pub factory: Arc<InstanceFactory>,
    pub pool: Arc<InstancePool>,
    pub events: PoolEventBus,
}

impl AppContext {
    /// Wire catalog, provider, caches, factory, store and pool from `config`
    pub fn build(config: &AppConfig) -> Result<Self> {
        let catalog = Arc::new(InMemoryPluginCatalog::new());
        register_builtins(&catalog);

        let provider = if config.models.is_empty() {
            LocalModelProvider::permissive()
        } else {
            config
                .models
                .iter()
                .fold(LocalModelProvider::new(), |provider, id| {
                    provider.with_config(id.clone())
                })
        };

        let factory = Arc::new(
            InstanceFactory::new(
                catalog.clone(),
                Arc::new(provider),
                Arc::new(SharedResources::new()),
            )
            .with_config(config.factory.clone()),
        );
        let store = Arc::new(InMemoryInstanceStore::with_records(
            config.instances.iter().cloned(),
        ));
        let pool = Arc::new(
            InstancePool::new(config.pool.clone(), Arc::clone(&factory), store.clone())
                .context("Invalid pool configuration")?,
        );

        info!(
            plugins = catalog.len(),
            backends = factory.list_supported_backends().len(),
            "Application context ready"
        );

        Ok(Self {
            catalog,
            store,
            factory,
            pool,
            events: PoolEventBus::new(config.events.capacity),
        })
    }
}

/// Run the pool until Ctrl-C
pub async fn run() -> Result<()> {
    info!("Starting Kairos instance pool v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("Failed to load configuration")?;
    info!("Configuration loaded");

    let ctx = AppContext::build(&config)?;
    info!(instances = ctx.store.len(), "Configuration store seeded");

    if config.pool.prewarm_on_start {
        let summary = ctx
            .pool
            .prewarm_all()
            .await
            .context("Failed to list configured instances")?;
        if summary.failed > 0 {
            warn!(
                failed = summary.failed,
                requested = summary.requested,
                "Some instances failed to prewarm"
            );
        }
    }

    let shutdown = CancellationToken::new();
    let tasks = vec![
        start_sweeper(&ctx.pool, &config, &shutdown),
        start_health_monitor(&ctx.pool, &config, &shutdown),
        start_event_listener(&ctx.pool, &ctx.events, &shutdown),
    ];

    info!("Kairos is running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown signal received");

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    ctx.pool.shutdown().await;
    info!("Kairos stopped");
    Ok(())
}

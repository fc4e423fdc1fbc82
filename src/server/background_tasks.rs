//! Background task startup functions
//!
//! Contains functions to start the warm tier sweeper, the health monitor and
//! the lifecycle event listener. Every task stops when `shutdown` is cancelled.

use super::config::AppConfig;
use kairos_core::{spawn_event_listener, spawn_sweeper, HealthMonitor, InstancePool, PoolEventBus};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Start the Warm→Cold sweeper
pub fn start_sweeper(
    pool: &Arc<InstancePool>,
    config: &AppConfig,
    shutdown: &CancellationToken,
) -> JoinHandle<()> {
    let interval = config.pool.sweep_interval();
    info!(
        "Sweeper started (interval: {}s, warm ttl: {}s)",
        interval.as_secs(),
        config.pool.warm_ttl_secs
    );
    spawn_sweeper(Arc::clone(pool), interval, shutdown.clone())
}

/// Start the health monitor
pub fn start_health_monitor(
    pool: &Arc<InstancePool>,
    config: &AppConfig,
    shutdown: &CancellationToken,
) -> JoinHandle<()> {
    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(pool),
        config.health_monitor.clone(),
    ));
    monitor.spawn(shutdown.clone())
}

/// Start the lifecycle event listener
pub fn start_event_listener(
    pool: &Arc<InstancePool>,
    events: &PoolEventBus,
    shutdown: &CancellationToken,
) -> JoinHandle<()> {
    spawn_event_listener(Arc::clone(pool), events.subscribe(), shutdown.clone())
}

//! Health monitor - Periodic checks with rebuild-in-place recovery
//!
//! Every round runs [`InstancePool::health_check_all`]. An instance that fails
//! `failure_threshold` consecutive rounds is rebuilt from the store's record,
//! at most once per `recovery_backoff`. A healthy round clears its history.

use crate::config::HealthMonitorConfig;
use crate::instance::InstanceKey;
use crate::pool::InstancePool;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct RecoveryAttempt {
    count: u32,
    last_attempt: Instant,
}

#[derive(Default)]
struct MonitorState {
    rounds: u64,
    failures: HashMap<InstanceKey, u32>,
    recoveries: HashMap<InstanceKey, RecoveryAttempt>,
}

/// Outcome of one monitor round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorRound {
    /// Instances checked
    pub checked: usize,
    /// Healthy instances
    pub healthy: usize,
    /// Unhealthy instances
    pub unhealthy: usize,
    /// Instances rebuilt this round
    pub recovered: Vec<InstanceKey>,
    /// Instances whose rebuild failed this round
    pub recovery_failed: Vec<InstanceKey>,
}

/// Monitor counters
#[derive(Debug, Clone, Serialize)]
pub struct HealthMonitorStats {
    /// Completed rounds
    pub rounds: u64,
    /// Instances with at least one consecutive failure
    pub failing_instances: usize,
    /// Instances with a rebuild attempt on record
    pub recovering_instances: usize,
    /// Consecutive failures per instance
    pub failure_counts: BTreeMap<String, u32>,
    /// Rebuild attempts per instance
    pub recovery_attempts: BTreeMap<String, u32>,
}

/// Periodic pool health checker
pub struct HealthMonitor {
    pool: Arc<InstancePool>,
    config: HealthMonitorConfig,
    state: Mutex<MonitorState>,
}

impl HealthMonitor {
    /// Create a monitor for `pool`
    #[must_use]
    pub fn new(pool: Arc<InstancePool>, config: HealthMonitorConfig) -> Self {
        Self {
            pool,
            config,
            state: Mutex::new(MonitorState::default()),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Monitor configuration
    #[must_use]
    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Run one round: check, count failures, rebuild what is due
    pub async fn run_once(&self) -> MonitorRound {
        let report = self.pool.health_check_all().await;
        let mut round = MonitorRound {
            checked: report.len(),
            ..MonitorRound::default()
        };
        let now = Instant::now();

        let due: Vec<InstanceKey> = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            state.rounds += 1;
            // Instances that left the checked tiers start over
            state.failures.retain(|key, _| report.contains_key(key));
            state.recoveries.retain(|key, _| report.contains_key(key));

            let mut due = Vec::new();
            for (key, health) in &report {
                if health.is_healthy() {
                    round.healthy += 1;
                    if state.failures.remove(key).is_some() {
                        info!(instance = %key, "Instance healthy again");
                    }
                    state.recoveries.remove(key);
                    continue;
                }

                round.unhealthy += 1;
                let failures = {
                    let count = state.failures.entry(key.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                if failures < self.config.failure_threshold {
                    debug!(instance = %key, failures, threshold = self.config.failure_threshold, "Instance unhealthy");
                    continue;
                }

                let backoff_elapsed = state.recoveries.get(key).map_or(true, |attempt| {
                    now.duration_since(attempt.last_attempt) >= self.config.recovery_backoff()
                });
                if backoff_elapsed {
                    due.push(key.clone());
                } else {
                    debug!(instance = %key, failures, "Rebuild deferred by backoff");
                }
            }
            due
        };

        for key in due {
            let attempt = {
                let mut state = self.lock_state();
                let attempt = state
                    .recoveries
                    .entry(key.clone())
                    .or_insert(RecoveryAttempt {
                        count: 0,
                        last_attempt: now,
                    });
                attempt.count += 1;
                attempt.last_attempt = now;
                attempt.count
            };

            warn!(instance = %key, attempt, "Rebuilding unhealthy instance");
            match self.pool.reload(&key).await {
                Ok(rebuilt) => {
                    self.lock_state().failures.remove(&key);
                    if rebuilt {
                        info!(instance = %key, attempt, "Instance rebuilt");
                        round.recovered.push(key);
                    }
                }
                Err(e) => {
                    error!(instance = %key, attempt, error = %e, "Instance rebuild failed");
                    round.recovery_failed.push(key);
                }
            }
        }

        round
    }

    /// Failure and recovery counters
    #[must_use]
    pub fn stats(&self) -> HealthMonitorStats {
        let state = self.lock_state();
        HealthMonitorStats {
            rounds: state.rounds,
            failing_instances: state.failures.len(),
            recovering_instances: state.recoveries.len(),
            failure_counts: state
                .failures
                .iter()
                .map(|(key, count)| (key.to_string(), *count))
                .collect(),
            recovery_attempts: state
                .recoveries
                .iter()
                .map(|(key, attempt)| (key.to_string(), attempt.count))
                .collect(),
        }
    }

    /// Run rounds every `interval_secs` until `token` is cancelled.
    ///
    /// A disabled monitor returns a task that exits immediately.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                info!("Health monitor disabled");
                return;
            }

            let interval = self.config.interval();
            info!(
                interval_secs = interval.as_secs(),
                failure_threshold = self.config.failure_threshold,
                "Health monitor started"
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let round = self.run_once().await;
                        if round.unhealthy > 0 {
                            warn!(
                                checked = round.checked,
                                unhealthy = round.unhealthy,
                                recovered = round.recovered.len(),
                                "Health round found unhealthy instances"
                            );
                        } else {
                            debug!(checked = round.checked, "Health round clean");
                        }
                    }
                    _ = token.cancelled() => {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AgentsAdapter, OrchestratorAdapter};
    use crate::backends::{AgentsStreamWrapper, BackendComponents};
    use crate::config::PoolConfig;
    use crate::engine::{EngineContext, EngineHealth, ExecutionEngine, ExecutionWrapper};
    use crate::error::Result;
    use crate::factory::InstanceFactory;
    use crate::instance::InstanceRecord;
    use crate::resources::SharedResources;
    use crate::store::InMemoryInstanceStore;
    use kairos_llm::LocalModelProvider;
    use kairos_plugins::InMemoryPluginCatalog;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlakyEngine {
        healthy: bool,
    }

    #[async_trait::async_trait]
    impl ExecutionEngine for FlakyEngine {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn initialize(&self, _ctx: EngineContext<'_>) -> Result<()> {
            Ok(())
        }

        async fn execute(
            &self,
            _ctx: EngineContext<'_>,
            _prompt: &str,
        ) -> Result<Vec<serde_json::Value>> {
            Ok(Vec::new())
        }

        async fn health_check(&self, _ctx: EngineContext<'_>) -> EngineHealth {
            EngineHealth {
                ready: self.healthy,
                detail: (!self.healthy).then(|| "flaky".to_string()),
            }
        }
    }

    /// Engines built before `heal_after` report unhealthy
    fn setup(heal_after: usize, config: HealthMonitorConfig) -> (HealthMonitor, Arc<AtomicUsize>) {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);

        let factory = InstanceFactory::new(
            Arc::new(InMemoryPluginCatalog::new()),
            Arc::new(LocalModelProvider::permissive()),
            Arc::new(SharedResources::new()),
        );
        factory.register_backend(
            "flaky",
            "supervisor",
            BackendComponents::new(
                || Arc::new(AgentsAdapter) as Arc<dyn OrchestratorAdapter>,
                move |_| {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Box::new(FlakyEngine {
                        healthy: n >= heal_after,
                    }) as Box<dyn ExecutionEngine>
                },
                || Arc::new(AgentsStreamWrapper) as Arc<dyn ExecutionWrapper>,
            ),
        );
        let store = InMemoryInstanceStore::with_records([InstanceRecord::new(
            "acme", "a", "flaky", "supervisor",
        )]);
        let pool = InstancePool::new(PoolConfig::default(), Arc::new(factory), Arc::new(store))
            .unwrap();

        (HealthMonitor::new(Arc::new(pool), config), builds)
    }

    fn key() -> InstanceKey {
        InstanceKey::new("acme", "a")
    }

    #[tokio::test]
    async fn test_rebuild_after_threshold() {
        let config = HealthMonitorConfig::default().with_failure_threshold(3);
        let (monitor, builds) = setup(1, config);
        monitor.pool.get(&key()).await.unwrap();

        for _ in 0..2 {
            let round = monitor.run_once().await;
            assert_eq!(round.unhealthy, 1);
            assert!(round.recovered.is_empty());
        }
        assert_eq!(monitor.stats().failure_counts["acme/a"], 2);
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let round = monitor.run_once().await;
        assert_eq!(round.recovered, vec![key()]);
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        let round = monitor.run_once().await;
        assert_eq!(round.healthy, 1);
        let stats = monitor.stats();
        assert_eq!(stats.rounds, 4);
        assert_eq!(stats.failing_instances, 0);
        assert_eq!(stats.recovering_instances, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuilds_respect_backoff() {
        let config = HealthMonitorConfig::default()
            .with_failure_threshold(1)
            .with_recovery_backoff(Duration::from_secs(300));
        let (monitor, builds) = setup(usize::MAX, config);
        monitor.pool.get(&key()).await.unwrap();

        assert_eq!(monitor.run_once().await.recovered.len(), 1);
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(monitor.run_once().await.recovered.is_empty());
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(241)).await;
        assert_eq!(monitor.run_once().await.recovered.len(), 1);
        assert_eq!(builds.load(Ordering::SeqCst), 3);
        assert_eq!(monitor.stats().recovery_attempts["acme/a"], 2);
    }

    #[tokio::test]
    async fn test_evicted_instances_are_forgotten() {
        let config = HealthMonitorConfig::default().with_failure_threshold(5);
        let (monitor, _) = setup(usize::MAX, config);
        monitor.pool.get(&key()).await.unwrap();

        monitor.run_once().await;
        assert_eq!(monitor.stats().failing_instances, 1);

        monitor.pool.evict(&key()).await.unwrap();
        let round = monitor.run_once().await;
        assert_eq!(round.checked, 0);
        assert_eq!(monitor.stats().failing_instances, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_stops_on_cancel() {
        let (monitor, _) = setup(0, HealthMonitorConfig::default());
        let monitor = Arc::new(monitor);
        monitor.pool.get(&key()).await.unwrap();

        let token = CancellationToken::new();
        let handle = Arc::clone(&monitor).spawn(token.clone());
        tokio::time::sleep(monitor.config().interval() * 2 + Duration::from_secs(1)).await;
        assert_eq!(monitor.stats().rounds, 2);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_monitor_exits() {
        let config = HealthMonitorConfig {
            enabled: false,
            ..HealthMonitorConfig::default()
        };
        let (monitor, _) = setup(0, config);
        Arc::new(monitor)
            .spawn(CancellationToken::new())
            .await
            .unwrap();
    }
}

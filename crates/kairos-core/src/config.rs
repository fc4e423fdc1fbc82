use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default Hot tier capacity
pub const DEFAULT_MAX_HOT_INSTANCES: usize = 200;

/// Default Warm tier time-to-live in seconds (1 hour)
pub const DEFAULT_WARM_TTL_SECS: u64 = 3600;

/// Default interval between Warm tier sweeps in seconds
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default per-instance health check timeout in milliseconds
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_MS: u64 = 5000;

/// Default interval between health monitor rounds in seconds
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 60;

/// Default consecutive failures before recovery is attempted
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default wait between recovery attempts in seconds (5 minutes)
pub const DEFAULT_RECOVERY_BACKOFF_SECS: u64 = 300;

// ============================================================================
// Pool
// ============================================================================

/// Instance pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Hot tier capacity (default: 200)
    #[serde(default = "default_max_hot_instances")]
    pub max_hot_instances: usize,

    /// Seconds a demoted instance stays Warm before the sweep moves it to Cold
    #[serde(default = "default_warm_ttl_secs")]
    pub warm_ttl_secs: u64,

    /// Seconds between Warm tier sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Per-instance health check timeout in milliseconds
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    /// Also health-check Warm instances
    #[serde(default)]
    pub health_check_warm: bool,

    /// Load every configured instance at startup
    #[serde(default = "default_true")]
    pub prewarm_on_start: bool,
}

fn default_max_hot_instances() -> usize {
    DEFAULT_MAX_HOT_INSTANCES
}

fn default_warm_ttl_secs() -> u64 {
    DEFAULT_WARM_TTL_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_health_check_timeout_ms() -> u64 {
    DEFAULT_HEALTH_CHECK_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_hot_instances: default_max_hot_instances(),
            warm_ttl_secs: default_warm_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            health_check_warm: false,
            prewarm_on_start: true,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Hot tier capacity
    #[must_use]
    pub fn with_max_hot_instances(mut self, max: usize) -> Self {
        self.max_hot_instances = max;
        self
    }

    /// Set the Warm tier TTL
    #[must_use]
    pub fn with_warm_ttl(mut self, ttl: Duration) -> Self {
        self.warm_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the sweep interval
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_secs = interval.as_secs();
        self
    }

    /// Set the health check timeout
    #[must_use]
    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Include Warm instances in health checks
    #[must_use]
    pub fn with_health_check_warm(mut self, enabled: bool) -> Self {
        self.health_check_warm = enabled;
        self
    }

    /// Warm tier TTL
    #[must_use]
    pub fn warm_ttl(&self) -> Duration {
        Duration::from_secs(self.warm_ttl_secs)
    }

    /// Sweep interval
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Health check timeout
    #[must_use]
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Reject values the pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_hot_instances == 0 {
            return Err(Error::Configuration(
                "pool.max_hot_instances must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::Configuration(
                "pool.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.health_check_timeout_ms == 0 {
            return Err(Error::Configuration(
                "pool.health_check_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Health monitor
// ============================================================================

/// Health monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMonitorConfig {
    /// Whether the monitor runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between monitor rounds
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,

    /// Consecutive failures before a rebuild is attempted
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Minimum seconds between rebuild attempts for one instance
    #[serde(default = "default_recovery_backoff_secs")]
    pub recovery_backoff_secs: u64,
}

fn default_monitor_interval_secs() -> u64 {
    DEFAULT_MONITOR_INTERVAL_SECS
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_recovery_backoff_secs() -> u64 {
    DEFAULT_RECOVERY_BACKOFF_SECS
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_monitor_interval_secs(),
            failure_threshold: default_failure_threshold(),
            recovery_backoff_secs: default_recovery_backoff_secs(),
        }
    }
}

impl HealthMonitorConfig {
    /// Set the failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the recovery backoff
    #[must_use]
    pub fn with_recovery_backoff(mut self, backoff: Duration) -> Self {
        self.recovery_backoff_secs = backoff.as_secs();
        self
    }

    /// Monitor interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Recovery backoff
    #[must_use]
    pub fn recovery_backoff(&self) -> Duration {
        Duration::from_secs(self.recovery_backoff_secs)
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Instance factory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Abort the whole build when any declared plugin fails to load.
    /// When false, failing plugins are logged and skipped.
    #[serde(default = "default_true")]
    pub require_all_plugins: bool,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            require_all_plugins: true,
        }
    }
}

impl FactoryConfig {
    /// Set the plugin failure policy
    #[must_use]
    pub fn with_require_all_plugins(mut self, required: bool) -> Self {
        self.require_all_plugins = required;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_hot_instances, 200);
        assert_eq!(config.warm_ttl(), Duration::from_secs(3600));
        assert_eq!(config.health_check_timeout(), Duration::from_millis(5000));
        assert!(!config.health_check_warm);
        assert!(config.prewarm_on_start);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_rejects_zero_capacity() {
        let config = PoolConfig::new().with_max_hot_instances(0);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: PoolConfig = serde_json::from_str(r#"{"max_hot_instances": 5}"#).unwrap();
        assert_eq!(config.max_hot_instances, 5);
        assert_eq!(config.warm_ttl_secs, DEFAULT_WARM_TTL_SECS);

        let monitor: HealthMonitorConfig = serde_json::from_str("{}").unwrap();
        assert!(monitor.enabled);
        assert_eq!(monitor.failure_threshold, 3);
        assert_eq!(monitor.recovery_backoff(), Duration::from_secs(300));

        let factory: FactoryConfig = serde_json::from_str("{}").unwrap();
        assert!(factory.require_all_plugins);
    }
}

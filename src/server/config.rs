//! Server configuration types
//!
//! Library sections (`pool`, `health_monitor`, `factory`) reuse the
//! `kairos-core` structs directly.

use kairos_core::{FactoryConfig, HealthMonitorConfig, InstanceRecord, PoolConfig};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub health_monitor: HealthMonitorConfig,
    #[serde(default)]
    pub factory: FactoryConfig,
    #[serde(default)]
    pub events: EventsConfig,
    /// Model configuration ids the local provider accepts; empty accepts any
    #[serde(default)]
    pub models: Vec<String>,
    /// Seed records for the in-memory configuration store
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
}

/// Lifecycle event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    kairos_core::events::DEFAULT_EVENT_CAPACITY
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

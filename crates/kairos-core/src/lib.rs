//! Kairos Core - Tiered Orchestrator Instance Pool
//!
//! This crate keeps per-tenant orchestrator instances ready to serve:
//! - Cache: Reference-counted, single-flight shared resource caches
//! - Resources: Bundle / model / template caches and their keys
//! - Adapter: Backend-specific tool and model binding
//! - Bundle: Plugin bundles built from validated contracts
//! - Factory: `(backend, mode)` registry that builds instances
//! - Instance: One tenant's orchestrator with its engine and plugins
//! - Pool: Hot / Warm / Cold tiers, sweeping, health checks, stats
//! - Health: Periodic monitoring with rebuild-in-place recovery
//! - Events: Load / reload / unload notifications over a broadcast bus

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod backends;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod factory;
pub mod health;
pub mod instance;
pub mod plugin_manager;
pub mod pool;
pub mod resources;
pub mod store;
pub mod template;

pub use adapter::{
    AgentsAdapter, BoundModel, ExecutionNode, GraphAdapter, NativeTool, OrchestratorAdapter,
};
pub use backends::{
    agents_components, builtin_backends, graph_components, AgentsEngine, AgentsStreamWrapper,
    BackendComponents, GraphEngine, GraphStreamWrapper, MODES,
};
pub use bundle::{BuiltBundle, BundleBuilder, PluginBundle};
pub use cache::{CacheStats, SharedResource, SharedResourceCache};
pub use config::{FactoryConfig, HealthMonitorConfig, PoolConfig};
pub use engine::{EngineContext, EngineHealth, ExecutionEngine, ExecutionWrapper, StreamEvent};
pub use error::{format_error_for_cli, Error, ErrorKind, Result, UserFriendlyError};
pub use events::{handle_event, spawn_event_listener, EventOutcome, PoolEvent, PoolEventBus};
pub use factory::InstanceFactory;
pub use health::{HealthMonitor, HealthMonitorStats, MonitorRound};
pub use instance::{
    InstanceHealthDetail, InstanceKey, InstanceParts, InstanceRecord, OrchestratorInstance,
};
pub use plugin_manager::PluginManager;
pub use pool::{
    spawn_sweeper, HealthStatus, InstanceHealth, InstancePool, PoolStats, PooledInstance,
    PrewarmSummary, Tier,
};
pub use resources::{
    BundleKey, LeaseGuard, ModelKey, ModelLease, SharedLeases, SharedResourceStats, SharedResources,
    TemplateKey,
};
pub use store::{InMemoryInstanceStore, InstanceStore};
pub use template::{compile_graph_template, ExecutionTemplate};

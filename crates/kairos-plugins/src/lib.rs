//! Kairos Plugins - Plugin Contracts and Settings
//!
//! This crate provides the plugin side of the Kairos instance pool:
//! - Contract: Plugin metadata, agent traits and optional capabilities
//! - Tool: SDK-neutral tool specifications exposed by plugin agents
//! - Settings: Schema defaults + per-instance overrides, fingerprints, masking
//! - Validator: Structural and dependency checks before a plugin is loaded
//! - Catalog: Resolution of `pid` / `pid@version` to a concrete contract
//! - Builtin: Plugins shipped with the pool

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builtin;
pub mod catalog;
pub mod contract;
pub mod error;
pub mod settings;
pub mod spec;
pub mod tool;
pub mod validator;

pub use builtin::{
    register_builtins, EchoPlugin, ScratchpadAgent, ScratchpadPlugin, ECHO_PID, SCRATCHPAD_PID,
};
pub use catalog::{compare_versions, InMemoryPluginCatalog, PluginCatalog};
pub use contract::{
    AgentLifecycle, DependencyCheck, Plugin, PluginAgent, PluginContract, PluginMetadata,
    SettingSpec,
};
pub use error::{Error, Result};
pub use settings::{
    mask_sensitive_settings, resolve_settings, sensitive_keys, settings_fingerprint,
    PluginOverrides, ResolvedSettings, SettingsResolver, MASKED_VALUE,
};
pub use spec::PluginSpec;
pub use tool::ToolSpec;
pub use validator::ContractValidator;

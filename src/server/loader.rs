//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use super::config::AppConfig;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::collections::BTreeSet;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            File::with_name(&format!(
                "config/{}",
                std::env::var("KAIROS_ENV").unwrap_or_else(|_| "development".to_string())
            ))
            .required(false),
        )
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority)
        // KAIROS_POOL__MAX_HOT_INSTANCES: one `_` after the prefix, `__` between levels
        .add_source(
            Environment::with_prefix("KAIROS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let config: AppConfig = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    validate(&config)?;
    Ok(config)
}

/// Reject configurations the pool cannot run with
pub fn validate(config: &AppConfig) -> Result<()> {
    config.pool.validate().context("Invalid [pool] section")?;

    let mut seen = BTreeSet::new();
    for record in &config.instances {
        if !seen.insert(record.key()) {
            bail!("Instance {} is configured more than once", record.key());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairos_core::InstanceRecord;

    #[test]
    fn test_embedded_defaults_parse() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.pool.max_hot_instances, 200);
        assert_eq!(config.health_monitor.failure_threshold, 3);
        assert!(config.factory.require_all_plugins);
        assert!(!config.instances.is_empty());
        validate(&config).unwrap();
    }

    #[test]
    fn test_duplicate_instances_rejected() {
        let record = InstanceRecord::new("acme", "support", "graph", "supervisor");
        let config = AppConfig {
            instances: vec![record.clone(), record],
            ..AppConfig::default()
        };
        assert!(validate(&config).is_err());
    }
}

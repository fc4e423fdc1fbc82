//! Configuration check
//!
//! Resolves every configured instance's plugins the way the factory would,
//! without building anything. Sensitive values are masked in the output.

use crate::server::{load_config, AppContext};
use anyhow::{bail, Context, Result};
use kairos_core::InstanceRecord;
use kairos_plugins::{
    mask_sensitive_settings, settings_fingerprint, ContractValidator, PluginCatalog, PluginSpec,
    SettingsResolver,
};

/// Run the check; the first configuration error aborts with a non-zero exit
pub async fn run() -> Result<()> {
    let config = load_config()?;
    let ctx = AppContext::build(&config)?;
    let validator = ContractValidator::new();

    if config.instances.is_empty() {
        println!("No instances configured");
        return Ok(());
    }

    for record in &config.instances {
        check_instance(&ctx, &validator, record).await?;
    }

    println!("\n✅ {} instances OK", config.instances.len());
    Ok(())
}

async fn check_instance(
    ctx: &AppContext,
    validator: &ContractValidator,
    record: &InstanceRecord,
) -> Result<()> {
    let key = record.key();
    println!(
        "{} [{}/{}] config {}",
        key,
        record.backend,
        record.mode,
        &record.config_hash()[..12]
    );

    if !ctx.factory.supports(&record.backend, &record.mode) {
        bail!(
            "{}: unsupported backend {}/{}",
            key,
            record.backend,
            record.mode
        );
    }

    let resolver = SettingsResolver::new(record.plugin_settings.clone());
    for spec in &record.active_plugins {
        let spec =
            PluginSpec::parse(spec).with_context(|| format!("{}: invalid plugin spec", key))?;
        let contract = ctx
            .catalog
            .resolve(&spec.pid, spec.version.as_deref())
            .await
            .with_context(|| format!("{}: cannot resolve {}", key, spec.pid))?;
        validator
            .validate(&contract)
            .with_context(|| format!("{}: {} failed validation", key, contract.label()))?;

        let schema = &contract.metadata().settings_schema;
        let settings = resolver
            .resolve(contract.pid(), contract.version(), schema)
            .with_context(|| format!("{}: settings for {}", key, contract.label()))?;
        let masked = mask_sensitive_settings(&settings, schema);

        println!(
            "  {} ({}) fingerprint {} {}",
            contract.label(),
            if contract.is_stateless() {
                "shared"
            } else {
                "per-instance"
            },
            settings_fingerprint(&settings),
            serde_json::to_string(&masked).context("Failed to render settings")?
        );
    }

    if let Some(model) = &record.model {
        println!(
            "  model {} / {} (temperature {}, max tokens {})",
            model.config_id, model.model_name, model.temperature, model.max_tokens
        );
    }
    Ok(())
}

//! One-shot pool inspection commands

use crate::server::{load_config, AppContext};
use anyhow::{Context, Result};
use kairos_core::{format_error_for_cli, InstanceKey};

/// Prewarm every configured instance, print `PoolStats`, shut down
pub async fn stats() -> Result<()> {
    let config = load_config()?;
    let ctx = AppContext::build(&config)?;

    let summary = ctx
        .pool
        .prewarm_all()
        .await
        .context("Failed to list configured instances")?;
    if summary.failed > 0 {
        eprintln!(
            "{} of {} instances failed to load (see logs)",
            summary.failed, summary.requested
        );
    }

    let stats = ctx.pool.get_stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&stats).context("Failed to serialize stats")?
    );

    ctx.pool.shutdown().await;
    Ok(())
}

/// Print the registered `(backend, mode)` pairs
pub fn backends() -> Result<()> {
    let config = load_config()?;
    let ctx = AppContext::build(&config)?;
    for (backend, mode) in ctx.factory.list_supported_backends() {
        println!("{}/{}", backend, mode);
    }
    Ok(())
}

/// Send `prompt` to one instance and print the normalized events
pub async fn invoke(tenant: &str, instance: &str, prompt: &str, sse: bool) -> Result<()> {
    let config = load_config()?;
    let ctx = AppContext::build(&config)?;
    let key = InstanceKey::new(tenant, instance);

    let result = async {
        let pooled = ctx.pool.get(&key).await?;
        pooled.invoke(prompt).await
    }
    .await;

    let outcome = match result {
        Ok(events) => {
            for event in &events {
                if sse {
                    print!("{}", event.to_sse());
                } else {
                    println!("{}", serde_json::to_string(event)?);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", format_error_for_cli(&e));
            Err(anyhow::Error::new(e).context(format!("Invocation of {} failed", key)))
        }
    };

    ctx.pool.shutdown().await;
    outcome
}

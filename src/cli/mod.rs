//! CLI module for Kairos
//!
//! Provides operator commands:
//! - `serve`: Run the pool with its background tasks until Ctrl-C
//! - `stats`: Prewarm the configured instances and print pool statistics
//! - `backends`: List registered `(backend, mode)` pairs
//! - `check`: Resolve and validate every configured instance's plugins
//! - `invoke`: Send one prompt to an instance

use clap::{Parser, Subcommand};

pub mod check;
pub mod inspect;

/// Kairos instance pool CLI
#[derive(Parser, Debug)]
#[command(name = "kairos")]
#[command(about = "Tiered orchestrator instance pool")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pool until Ctrl-C
    Serve,
    /// Prewarm every configured instance and print pool statistics as JSON
    Stats,
    /// List registered (backend, mode) pairs
    Backends,
    /// Resolve plugin settings for every configured instance
    Check,
    /// Send one prompt to an instance and print its event stream
    Invoke {
        /// Tenant id
        tenant: String,
        /// Instance id
        instance: String,
        /// Prompt text
        prompt: String,
        /// Print server-sent event frames instead of JSON lines
        #[arg(long)]
        sse: bool,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) => crate::server::run().await,
        Some(Commands::Stats) => inspect::stats().await,
        Some(Commands::Backends) => inspect::backends(),
        Some(Commands::Check) => check::run().await,
        Some(Commands::Invoke {
            tenant,
            instance,
            prompt,
            sse,
        }) => inspect::invoke(&tenant, &instance, &prompt, sse).await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

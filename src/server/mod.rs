//! Server module for Kairos
//!
//! Contains the composition root and the long-running `serve` loop.
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for the binary
//! - `loader`: Configuration loading from files and environment
//! - `init`: Application context (catalog, store, factory, pool) and run loop
//! - `background_tasks`: Sweeper, health monitor and event listener startup

mod background_tasks;
pub mod config;
mod init;
mod loader;

// Re-export public API
pub use init::{run, AppContext};
pub use loader::load_config;

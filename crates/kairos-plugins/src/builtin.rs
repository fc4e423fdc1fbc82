//! Builtin - Plugins shipped with the pool
//!
//! - `io.kairos.system.echo`: stateless, shareable across instances
//! - `io.kairos.system.scratchpad`: stateful per-instance notes with lifecycle hooks

use crate::catalog::InMemoryPluginCatalog;
use crate::contract::{AgentLifecycle, Plugin, PluginAgent, PluginMetadata, SettingSpec};
use crate::error::{Error, Result};
use crate::settings::ResolvedSettings;
use crate::tool::ToolSpec;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Echo plugin identifier
pub const ECHO_PID: &str = "io.kairos.system.echo";
/// Scratchpad plugin identifier
pub const SCRATCHPAD_PID: &str = "io.kairos.system.scratchpad";

/// Register every builtin plugin
pub fn register_builtins(catalog: &InMemoryPluginCatalog) {
    catalog.register(Arc::new(EchoPlugin::new()));
    catalog.register(Arc::new(ScratchpadPlugin::new()));
}

// ============================================================================
// Echo
// ============================================================================

/// Stateless echo plugin
pub struct EchoPlugin {
    metadata: PluginMetadata,
}

impl Default for EchoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoPlugin {
    /// Create the plugin
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: PluginMetadata::new(ECHO_PID, "Echo", "1.0.0")
                .with_description("Echoes its input back, optionally prefixed")
                .with_stateless(true)
                .with_setting(
                    SettingSpec::new("prefix", "Text prepended to every echo")
                        .with_default(json!("")),
                )
                .with_setting(SettingSpec::new(
                    "model_config_id",
                    "Model configuration for a dedicated plugin model",
                ))
                .with_capability("echo"),
        }
    }
}

impl Plugin for EchoPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn create_agent(&self) -> Result<Box<dyn PluginAgent>> {
        Ok(Box::new(EchoAgent))
    }
}

struct EchoAgent;

impl PluginAgent for EchoAgent {
    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec::new("echo", "Return the given text unchanged").with_parameters(json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo" }
            },
            "required": ["text"]
        }))]
    }
}

// ============================================================================
// Scratchpad
// ============================================================================

/// Default number of notes the scratchpad keeps
pub const DEFAULT_SCRATCHPAD_CAPACITY: u64 = 100;

/// Stateful scratchpad plugin
pub struct ScratchpadPlugin {
    metadata: PluginMetadata,
}

impl Default for ScratchpadPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchpadPlugin {
    /// Create the plugin
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: PluginMetadata::new(SCRATCHPAD_PID, "Scratchpad", "1.0.0")
                .with_description("Per-instance working notes")
                .with_setting(
                    SettingSpec::new("capacity", "Maximum number of notes kept")
                        .with_default(json!(DEFAULT_SCRATCHPAD_CAPACITY)),
                )
                .with_capability("memory"),
        }
    }
}

impl Plugin for ScratchpadPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    fn create_agent(&self) -> Result<Box<dyn PluginAgent>> {
        Ok(Box::new(ScratchpadAgent::default()))
    }
}

/// Scratchpad agent state
#[derive(Default)]
pub struct ScratchpadAgent {
    notes: Mutex<Vec<String>>,
    capacity: Mutex<usize>,
    initialized: AtomicBool,
}

impl ScratchpadAgent {
    /// Append a note, dropping the oldest when full
    pub fn write(&self, note: impl Into<String>) -> Result<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(Error::Agent {
                plugin: SCRATCHPAD_PID.to_string(),
                message: "not initialized".to_string(),
            });
        }
        let capacity = *self.capacity.lock().unwrap_or_else(|e| e.into_inner());
        let mut notes = self.notes.lock().unwrap_or_else(|e| e.into_inner());
        notes.push(note.into());
        while notes.len() > capacity {
            notes.remove(0);
        }
        Ok(())
    }

    /// Current notes
    #[must_use]
    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl PluginAgent for ScratchpadAgent {
    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec::new("scratchpad_write", "Store a note").with_parameters(json!({
                "type": "object",
                "properties": { "note": { "type": "string" } },
                "required": ["note"]
            })),
            ToolSpec::new("scratchpad_read", "Read all notes"),
        ]
    }

    fn lifecycle(&self) -> Option<&dyn AgentLifecycle> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl AgentLifecycle for ScratchpadAgent {
    async fn initialize(&self, settings: &ResolvedSettings) -> Result<()> {
        let capacity = match settings.get("capacity") {
            None => DEFAULT_SCRATCHPAD_CAPACITY,
            Some(v) => v.as_u64().filter(|c| *c > 0).ok_or_else(|| Error::Agent {
                plugin: SCRATCHPAD_PID.to_string(),
                message: format!("capacity must be a positive integer, got {}", v),
            })?,
        };

        *self.capacity.lock().unwrap_or_else(|e| e.into_inner()) =
            usize::try_from(capacity).unwrap_or(usize::MAX);
        self.initialized.store(true, Ordering::SeqCst);
        debug!(capacity, "Scratchpad initialized");
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.notes.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.initialized.store(false, Ordering::SeqCst);
        debug!("Scratchpad cleaned up");
        Ok(())
    }
}

//! Engine - Execution seams of an orchestrator instance
//!
//! An [`ExecutionEngine`] runs the orchestration for one backend/mode pair and
//! yields the backend's native events. An [`ExecutionWrapper`] normalizes those
//! native events into [`StreamEvent`]s so every backend streams the same shape.

use crate::error::Result;
use crate::plugin_manager::PluginManager;
use crate::template::ExecutionTemplate;
use kairos_llm::ModelClient;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Backend-neutral streaming event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// An agent or node started
    AgentStart {
        /// Agent or node name
        agent: String,
    },
    /// An agent or node finished
    AgentEnd {
        /// Agent or node name
        agent: String,
    },
    /// A tool call started
    ToolStart {
        /// Tool name
        tool: String,
    },
    /// A tool call finished
    ToolEnd {
        /// Tool name
        tool: String,
        /// Tool output
        result: String,
    },
    /// Message content
    Message {
        /// Content
        content: String,
        /// Node that produced the message
        node: Option<String>,
        /// Whether this is the final answer
        is_final: bool,
    },
    /// Status update
    Status {
        /// Status text
        status: String,
        /// Extra payload
        data: serde_json::Value,
    },
    /// Error during execution
    Error {
        /// Error description
        error: String,
    },
}

impl StreamEvent {
    /// Status event without payload
    #[must_use]
    pub fn status(status: impl Into<String>) -> Self {
        Self::Status {
            status: status.into(),
            data: serde_json::Value::Null,
        }
    }

    /// Error event
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Event type name as serialized
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::AgentEnd { .. } => "agent_end",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::Message { .. } => "message",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
        }
    }

    /// Render as a server-sent event frame
    #[must_use]
    pub fn to_sse(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\ndata: {}\n\n", self.event_type(), data)
    }
}

/// Everything an engine may read from its instance
#[derive(Clone, Copy)]
pub struct EngineContext<'a> {
    /// Tenant
    pub tenant_id: &'a str,
    /// Backend kind
    pub backend: &'a str,
    /// Orchestration mode
    pub mode: &'a str,
    /// Loaded plugins
    pub plugins: &'a PluginManager,
    /// Compiled template, when the backend builds one
    pub template: Option<&'a ExecutionTemplate>,
    /// Top-level model, when configured
    pub model: Option<&'a Arc<dyn ModelClient>>,
    /// Instance-level settings
    pub settings: &'a BTreeMap<String, serde_json::Value>,
}

/// Engine readiness report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineHealth {
    /// Whether the engine can serve requests
    pub ready: bool,
    /// Optional detail
    pub detail: Option<String>,
}

/// Runs the orchestration for one backend/mode pair
#[async_trait::async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Prepare the engine once the instance is assembled
    async fn initialize(&self, ctx: EngineContext<'_>) -> Result<()>;

    /// Run one request, returning the backend's native events in order
    async fn execute(&self, ctx: EngineContext<'_>, prompt: &str)
        -> Result<Vec<serde_json::Value>>;

    /// Readiness
    async fn health_check(&self, ctx: EngineContext<'_>) -> EngineHealth;

    /// Release engine-level resources
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Converts native engine events into [`StreamEvent`]s
pub trait ExecutionWrapper: Send + Sync {
    /// Convert one native event; `None` skips it
    fn convert(&self, event: &serde_json::Value) -> Option<StreamEvent>;

    /// Convert a whole native stream
    fn wrap(&self, events: &[serde_json::Value]) -> Vec<StreamEvent> {
        events.iter().filter_map(|e| self.convert(e)).collect()
    }
}

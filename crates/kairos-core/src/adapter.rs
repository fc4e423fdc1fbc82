//! Adapter - Backend-specific tool and model wiring
//!
//! Each backend kind ships one adapter. The pool treats adapter operations as
//! opaque capabilities: convert a neutral tool, bind tools to a model, and
//! (for graph backends) build an explicit tool-execution node.

use kairos_llm::ModelClient;
use kairos_plugins::ToolSpec;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A tool in a backend's native representation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativeTool {
    /// Tool name
    pub name: String,
    /// Backend-native definition
    pub definition: serde_json::Value,
}

/// A model client with tools bound to it
#[derive(Clone)]
pub struct BoundModel {
    /// The underlying (possibly shared) client
    pub client: Arc<dyn ModelClient>,
    /// Names of the bound tools
    pub tool_names: Vec<String>,
}

impl fmt::Debug for BoundModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundModel")
            .field("model", &self.client.model_name())
            .field("tool_names", &self.tool_names)
            .finish()
    }
}

/// An explicit tool-execution node (graph backends)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionNode {
    /// Node name
    pub name: String,
    /// Tools the node dispatches to
    pub tools: Vec<String>,
}

/// Backend adapter
pub trait OrchestratorAdapter: Send + Sync {
    /// Adapter kind; part of the bundle cache key
    fn kind(&self) -> &str;

    /// Convert a neutral tool into the backend's representation
    fn native_tool(&self, tool: &ToolSpec) -> NativeTool;

    /// Bind tools to a model client
    fn bind_tools(&self, model: Arc<dyn ModelClient>, tools: &[NativeTool]) -> BoundModel {
        BoundModel {
            client: model,
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        }
    }

    /// Whether bundles need an explicit tool-execution node
    fn requires_execution_node(&self) -> bool {
        false
    }

    /// Build the tool-execution node for a plugin's tools
    fn execution_node(&self, plugin_id: &str, tools: &[NativeTool]) -> ExecutionNode {
        ExecutionNode {
            name: format!("{}.tools", plugin_id),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        }
    }
}

/// Adapter for the graph backend (function-calling tools, explicit tool nodes)
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphAdapter;

impl OrchestratorAdapter for GraphAdapter {
    fn kind(&self) -> &str {
        "graph"
    }

    fn native_tool(&self, tool: &ToolSpec) -> NativeTool {
        NativeTool {
            name: tool.name.clone(),
            definition: serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            }),
        }
    }

    fn requires_execution_node(&self) -> bool {
        true
    }
}

/// Adapter for the agents backend (framework-executed tools)
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentsAdapter;

impl OrchestratorAdapter for AgentsAdapter {
    fn kind(&self) -> &str {
        "agents"
    }

    fn native_tool(&self, tool: &ToolSpec) -> NativeTool {
        NativeTool {
            name: tool.name.clone(),
            definition: serde_json::json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.parameters,
            }),
        }
    }
}

//! Execution templates
//!
//! A template is the compiled structure of an orchestration graph: nodes and
//! edges only, no model bindings. Graph-backend templates depend only on
//! `(backend, mode, plugin ids)`, which is what makes them shareable.

use crate::cache::SharedResource;
use crate::error::{Error, Result};
use crate::resources::TemplateKey;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Entry node name of supervisor graphs
pub const SUPERVISOR_NODE: &str = "supervisor";
/// Entry node name of coordinator graphs
pub const COORDINATOR_NODE: &str = "coordinator";
/// Final node that writes the answer
pub const SYNTHESIZER_NODE: &str = "synthesizer";

/// A compiled orchestration graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionTemplate {
    /// Key the template was compiled for
    pub key: TemplateKey,
    /// Node names in execution order
    pub nodes: Vec<String>,
    /// Directed edges `(from, to)`
    pub edges: Vec<(String, String)>,
    /// Entry node
    pub entry: String,
    /// Compile time
    pub compiled_at: DateTime<Utc>,
}

impl ExecutionTemplate {
    /// Whether `node` is part of the graph
    #[must_use]
    pub fn has_node(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n == node)
    }

    /// Successors of `node`
    #[must_use]
    pub fn successors(&self, node: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(from, _)| from == node)
            .map(|(_, to)| to.as_str())
            .collect()
    }
}

impl SharedResource for ExecutionTemplate {}

/// Compile the graph for a `(mode, plugin ids)` combination.
///
/// - `supervisor`: hub node routes to each plugin and back, then synthesizes
/// - `coordinator`: coordinator fans out to every plugin, plugins feed the synthesizer
/// - `handoff`: plugins form a chain; each may hand off to the next
pub fn compile_graph_template(key: &TemplateKey) -> Result<ExecutionTemplate> {
    let plugins = &key.plugin_ids;
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let edge = |from: &str, to: &str| (from.to_string(), to.to_string());

    let entry = match key.mode.as_str() {
        "supervisor" => {
            nodes.push(SUPERVISOR_NODE.to_string());
            for pid in plugins {
                nodes.push(pid.clone());
                edges.push(edge(SUPERVISOR_NODE, pid));
                edges.push(edge(pid, SUPERVISOR_NODE));
            }
            edges.push(edge(SUPERVISOR_NODE, SYNTHESIZER_NODE));
            SUPERVISOR_NODE.to_string()
        }
        "coordinator" => {
            nodes.push(COORDINATOR_NODE.to_string());
            for pid in plugins {
                nodes.push(pid.clone());
                edges.push(edge(COORDINATOR_NODE, pid));
                edges.push(edge(pid, SYNTHESIZER_NODE));
            }
            if plugins.is_empty() {
                edges.push(edge(COORDINATOR_NODE, SYNTHESIZER_NODE));
            }
            COORDINATOR_NODE.to_string()
        }
        "handoff" => {
            let Some(first) = plugins.first() else {
                return Err(Error::Configuration(
                    "handoff mode needs at least one plugin".to_string(),
                ));
            };
            nodes.extend(plugins.iter().cloned());
            for pair in plugins.windows(2) {
                edges.push(edge(&pair[0], &pair[1]));
            }
            if let Some(last) = plugins.last() {
                edges.push(edge(last, SYNTHESIZER_NODE));
            }
            first.clone()
        }
        other => {
            return Err(Error::Configuration(format!(
                "graph backend has no template for mode '{}'",
                other
            )))
        }
    };
    nodes.push(SYNTHESIZER_NODE.to_string());

    Ok(ExecutionTemplate {
        key: key.clone(),
        nodes,
        edges,
        entry,
        compiled_at: Utc::now(),
    })
}

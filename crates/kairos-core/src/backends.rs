//! Backends - Registration bundles and the built-in backends
//!
//! A backend is registered per `(backend kind, mode)` as a
//! [`BackendComponents`] bundle of constructors. Two backends ship built in:
//!
//! - `graph`: explicit tool-execution nodes, shared compiled templates
//! - `agents`: framework-executed tools, no template

use crate::adapter::{AgentsAdapter, GraphAdapter, OrchestratorAdapter};
use crate::engine::{EngineContext, EngineHealth, ExecutionEngine, ExecutionWrapper, StreamEvent};
use crate::error::{Error, Result};
use crate::resources::TemplateKey;
use crate::template::{
    compile_graph_template, ExecutionTemplate, COORDINATOR_NODE, SUPERVISOR_NODE,
    SYNTHESIZER_NODE,
};
use kairos_llm::ModelClient;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Orchestration modes every built-in backend supports
pub const MODES: [&str; 3] = ["supervisor", "coordinator", "handoff"];

/// Node name graph engines report failures under
pub const ERROR_NODE: &str = "error_handler";

// ============================================================================
// Registration
// ============================================================================

/// Constructs the adapter of a backend
pub type AdapterConstructor = Arc<dyn Fn() -> Arc<dyn OrchestratorAdapter> + Send + Sync>;
/// Constructs the engine of a backend for a mode
pub type EngineConstructor = Arc<dyn Fn(&str) -> Box<dyn ExecutionEngine> + Send + Sync>;
/// Constructs the stream wrapper of a backend
pub type WrapperConstructor = Arc<dyn Fn() -> Arc<dyn ExecutionWrapper> + Send + Sync>;
/// Compiles an execution template
pub type TemplateCompiler = fn(&TemplateKey) -> Result<ExecutionTemplate>;

/// How a backend builds its template
#[derive(Clone, Copy)]
pub struct TemplateSpec {
    /// Compiler
    pub compiler: TemplateCompiler,
    /// Whether compiled templates go through the template cache
    pub shared: bool,
}

/// Constructors registered for one `(backend, mode)` pair
#[derive(Clone)]
pub struct BackendComponents {
    /// Adapter constructor
    pub adapter: AdapterConstructor,
    /// Engine constructor
    pub engine: EngineConstructor,
    /// Stream wrapper constructor
    pub wrapper: WrapperConstructor,
    /// Template compilation, if the backend uses templates
    pub template: Option<TemplateSpec>,
}

impl BackendComponents {
    /// Bundle the three constructors; no template
    pub fn new<A, E, W>(adapter: A, engine: E, wrapper: W) -> Self
    where
        A: Fn() -> Arc<dyn OrchestratorAdapter> + Send + Sync + 'static,
        E: Fn(&str) -> Box<dyn ExecutionEngine> + Send + Sync + 'static,
        W: Fn() -> Arc<dyn ExecutionWrapper> + Send + Sync + 'static,
    {
        Self {
            adapter: Arc::new(adapter),
            engine: Arc::new(engine),
            wrapper: Arc::new(wrapper),
            template: None,
        }
    }

    /// Compile a template per instance; `shared` routes it through the template cache
    #[must_use]
    pub fn with_template(mut self, compiler: TemplateCompiler, shared: bool) -> Self {
        self.template = Some(TemplateSpec { compiler, shared });
        self
    }
}

impl fmt::Debug for BackendComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendComponents")
            .field("adapter", &(self.adapter)().kind())
            .field(
                "template",
                &self.template.map(|t| if t.shared { "shared" } else { "per-instance" }),
            )
            .finish()
    }
}

/// Components of the graph backend
#[must_use]
pub fn graph_components() -> BackendComponents {
    BackendComponents::new(
        || Arc::new(GraphAdapter) as Arc<dyn OrchestratorAdapter>,
        |mode| Box::new(GraphEngine::new(mode)) as Box<dyn ExecutionEngine>,
        || Arc::new(GraphStreamWrapper) as Arc<dyn ExecutionWrapper>,
    )
    .with_template(compile_graph_template, true)
}

/// Components of the agents backend
#[must_use]
pub fn agents_components() -> BackendComponents {
    BackendComponents::new(
        || Arc::new(AgentsAdapter) as Arc<dyn OrchestratorAdapter>,
        |mode| Box::new(AgentsEngine::new(mode)) as Box<dyn ExecutionEngine>,
        || Arc::new(AgentsStreamWrapper) as Arc<dyn ExecutionWrapper>,
    )
}

/// Every built-in `(backend, mode, components)` registration
#[must_use]
pub fn builtin_backends() -> Vec<(&'static str, &'static str, BackendComponents)> {
    let mut backends = Vec::new();
    for mode in MODES {
        backends.push(("graph", mode, graph_components()));
        backends.push(("agents", mode, agents_components()));
    }
    backends
}

// ============================================================================
// Shared helpers
// ============================================================================

fn node_event(node: &str, data: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(node.to_string(), data);
    Value::Object(map)
}

/// Top-level model, else the first plugin model
fn answer_model(ctx: &EngineContext<'_>) -> Option<Arc<dyn ModelClient>> {
    ctx.model.cloned().or_else(|| {
        ctx.plugins
            .bundles()
            .find_map(|bundle| bundle.model().map(|m| Arc::clone(&m.client)))
    })
}

async fn synthesize(ctx: &EngineContext<'_>, prompt: &str) -> Result<String> {
    match answer_model(ctx) {
        Some(model) => Ok(model.complete(prompt).await?),
        // Without any model the answer is the prompt itself
        None => Ok(prompt.to_string()),
    }
}

async fn model_health(ctx: &EngineContext<'_>) -> Option<String> {
    let model = answer_model(ctx)?;
    match model.health_check().await {
        Ok(health) if health.healthy => None,
        Ok(health) => Some(format!(
            "model {} unhealthy: {}",
            health.model,
            health.detail.unwrap_or_default()
        )),
        Err(e) => Some(format!("model health check failed: {}", e)),
    }
}

// ============================================================================
// Graph backend
// ============================================================================

/// Walks a compiled graph template node by node
pub struct GraphEngine {
    mode: String,
    ready: AtomicBool,
}

impl GraphEngine {
    /// Create an engine for a mode
    #[must_use]
    pub fn new(mode: &str) -> Self {
        Self {
            mode: mode.to_string(),
            ready: AtomicBool::new(false),
        }
    }

    fn template<'a>(&self, ctx: &EngineContext<'a>) -> Result<&'a ExecutionTemplate> {
        ctx.template.ok_or_else(|| {
            Error::Configuration(format!("graph/{} requires a compiled template", self.mode))
        })
    }
}

#[async_trait::async_trait]
impl ExecutionEngine for GraphEngine {
    fn name(&self) -> &str {
        "graph"
    }

    async fn initialize(&self, ctx: EngineContext<'_>) -> Result<()> {
        let template = self.template(&ctx)?;
        let missing: Vec<String> = ctx
            .plugins
            .plugin_ids()
            .into_iter()
            .filter(|pid| !template.has_node(pid))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Configuration(format!(
                "template {} has no node for: {}",
                template.key,
                missing.join(", ")
            )));
        }

        self.ready.store(true, Ordering::SeqCst);
        debug!(mode = %self.mode, nodes = template.nodes.len(), "Graph engine ready");
        Ok(())
    }

    async fn execute(&self, ctx: EngineContext<'_>, prompt: &str) -> Result<Vec<Value>> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(Error::Internal("graph engine is not initialized".to_string()));
        }
        let template = self.template(&ctx)?;

        let mut events = Vec::new();
        for node in &template.nodes {
            match node.as_str() {
                SUPERVISOR_NODE | COORDINATOR_NODE => {
                    events.push(node_event(node, json!({ "route": template.successors(node) })));
                }
                SYNTHESIZER_NODE => match synthesize(&ctx, prompt).await {
                    Ok(content) => events.push(node_event(node, json!({ "content": content }))),
                    Err(e) => {
                        events.push(node_event(ERROR_NODE, json!({ "error": e.to_string() })))
                    }
                },
                pid => {
                    events.push(node_event(pid, json!({ "status": "active" })));
                    let tools_node = ctx.plugins.bundle(pid).and_then(|b| b.execution_node());
                    if let Some(tools_node) = tools_node {
                        for tool in &tools_node.tools {
                            events.push(node_event(&tools_node.name, json!({ "tool": tool })));
                        }
                    }
                }
            }
        }
        Ok(events)
    }

    async fn health_check(&self, ctx: EngineContext<'_>) -> EngineHealth {
        if !self.ready.load(Ordering::SeqCst) {
            return EngineHealth {
                ready: false,
                detail: Some("not initialized".to_string()),
            };
        }
        let detail = model_health(&ctx).await;
        EngineHealth {
            ready: detail.is_none() && ctx.template.is_some(),
            detail,
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Converts `{node: data}` graph events
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphStreamWrapper;

impl ExecutionWrapper for GraphStreamWrapper {
    fn convert(&self, event: &Value) -> Option<StreamEvent> {
        let (node, data) = event.as_object()?.iter().next()?;
        let text = |field: &str| data[field].as_str().unwrap_or_default().to_string();

        let converted = match node.as_str() {
            SUPERVISOR_NODE | COORDINATOR_NODE => StreamEvent::AgentStart {
                agent: node.clone(),
            },
            SYNTHESIZER_NODE => StreamEvent::Message {
                content: text("content"),
                node: Some(node.clone()),
                is_final: true,
            },
            ERROR_NODE => StreamEvent::error(text("error")),
            tools if tools.ends_with(".tools") => StreamEvent::ToolStart { tool: text("tool") },
            other => StreamEvent::Status {
                status: format!("node: {}", other),
                data: data.clone(),
            },
        };
        Some(converted)
    }
}

// ============================================================================
// Agents backend
// ============================================================================

/// Runs plugins as framework agents; no template
pub struct AgentsEngine {
    mode: String,
    ready: AtomicBool,
}

impl AgentsEngine {
    /// Create an engine for a mode
    #[must_use]
    pub fn new(mode: &str) -> Self {
        Self {
            mode: mode.to_string(),
            ready: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl ExecutionEngine for AgentsEngine {
    fn name(&self) -> &str {
        "agents"
    }

    async fn initialize(&self, ctx: EngineContext<'_>) -> Result<()> {
        if self.mode == "handoff" && ctx.plugins.is_empty() {
            return Err(Error::Configuration(
                "handoff mode needs at least one plugin".to_string(),
            ));
        }
        self.ready.store(true, Ordering::SeqCst);
        debug!(mode = %self.mode, plugins = ctx.plugins.len(), "Agents engine ready");
        Ok(())
    }

    async fn execute(&self, ctx: EngineContext<'_>, prompt: &str) -> Result<Vec<Value>> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(Error::Internal("agents engine is not initialized".to_string()));
        }

        let mut events = Vec::new();
        let handoff = self.mode == "handoff";
        if !handoff {
            events.push(json!({ "type": "agent_updated", "agent": self.mode }));
        }
        for bundle in ctx.plugins.bundles() {
            let kind = if handoff { "handoff" } else { "agent_updated" };
            events.push(json!({ "type": kind, "agent": bundle.pid() }));
            for tool in bundle.tools() {
                events.push(json!({ "type": "tool_called", "tool": tool.name }));
            }
        }

        match synthesize(&ctx, prompt).await {
            Ok(content) => events.push(json!({ "type": "message_output", "content": content })),
            Err(e) => events.push(json!({ "type": "error", "error": e.to_string() })),
        }
        Ok(events)
    }

    async fn health_check(&self, ctx: EngineContext<'_>) -> EngineHealth {
        if !self.ready.load(Ordering::SeqCst) {
            return EngineHealth {
                ready: false,
                detail: Some("not initialized".to_string()),
            };
        }
        let detail = model_health(&ctx).await;
        EngineHealth {
            ready: detail.is_none(),
            detail,
        }
    }

    async fn cleanup(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Converts `{"type": ...}` agent-framework events
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentsStreamWrapper;

impl ExecutionWrapper for AgentsStreamWrapper {
    fn convert(&self, event: &Value) -> Option<StreamEvent> {
        let text = |field: &str| event[field].as_str().unwrap_or_default().to_string();

        match event["type"].as_str()? {
            "agent_updated" => Some(StreamEvent::AgentStart {
                agent: text("agent"),
            }),
            "handoff" => Some(StreamEvent::Status {
                status: "handoff".to_string(),
                data: json!({ "to": text("agent") }),
            }),
            "tool_called" => Some(StreamEvent::ToolStart { tool: text("tool") }),
            "tool_output" => Some(StreamEvent::ToolEnd {
                tool: text("tool"),
                result: text("output"),
            }),
            "message_output" => Some(StreamEvent::Message {
                content: text("content"),
                node: None,
                is_final: true,
            }),
            "error" => Some(StreamEvent::error(text("error"))),
            _ => None,
        }
    }
}

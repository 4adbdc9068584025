/// Node executor dispatch
///
/// Every node type maps to a `NodeExecutor`. Registered dynamic nodes win
/// over built-ins; everything else goes through a fixed type -> category
/// table. Executors return a raw JSON value which the engine normalizes into
/// a `NodeOutput`.

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use crate::{
    config::EngineConfig,
    runtime::error::EngineError,
    workflow::{
        registry::NodeRegistry,
        types::{NodeResults, MAIN_HANDLE},
    },
};

pub mod action;
pub mod ai;
pub mod data;
pub mod dynamic;
pub mod flow;
pub mod output;
pub mod trigger;

pub use ai::{CompletionRequest, LanguageModel};
pub use dynamic::DynamicNodeExecutor;

/// Uniform executor contract
pub trait NodeExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        call: &'a NodeCall<'a>,
        inputs: &'a NodeInputs,
        ctx: &'a RuntimeContext<'a>,
    ) -> BoxFuture<'a, Result<Value>>;
}

/// The node being executed, with its properties already expression-resolved
#[derive(Debug, Clone, Copy)]
pub struct NodeCall<'a> {
    pub node_id: &'a str,
    pub node_type: &'a str,
    pub properties: &'a Map<String, Value>,
}

impl<'a> NodeCall<'a> {
    pub fn new(node_id: &'a str, node_type: &'a str, properties: &'a Map<String, Value>) -> Self {
        Self { node_id, node_type, properties }
    }

    /// Property value; explicit `null` counts as absent
    pub fn property(&self, name: &str) -> Option<&'a Value> {
        self.properties.get(name).filter(|value| !value.is_null())
    }

    /// Non-empty string property
    pub fn str_property(&self, name: &str) -> Option<&'a str> {
        self.property(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// String form of a property (numbers and booleans included), or `default`
    pub fn string_or(&self, name: &str, default: &str) -> String {
        match self.property(name) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    /// Domain error attributed to this node's type
    pub fn fail(&self, message: impl Into<String>) -> anyhow::Error {
        EngineError::node(self.node_type, message).into()
    }
}

/// Aggregated inputs of one node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInputs {
    /// Payload on the `main` handle (merged when several edges target it)
    pub main: Option<Value>,
    /// Payloads on non-`main` target handles
    pub handles: Map<String, Value>,
    /// Every payload that arrived on `main`, keyed by source node id, in edge order
    pub sources: Vec<(String, Value)>,
}

impl NodeInputs {
    /// `main` payload, `null` when nothing is connected
    pub fn main(&self) -> &Value {
        self.main.as_ref().unwrap_or(&Value::Null)
    }

    pub fn require_main(&self, node_type: &str) -> Result<&Value, EngineError> {
        self.main
            .as_ref()
            .ok_or_else(|| EngineError::node(node_type, "Missing required input: main"))
    }

    pub fn handle(&self, name: &str) -> Option<&Value> {
        if name == MAIN_HANDLE {
            return self.main.as_ref();
        }
        self.handles.get(name)
    }

    /// Mapping view: per-source payloads, named handles, `main` and its `json` alias
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (source, payload) in &self.sources {
            map.insert(source.clone(), payload.clone());
        }
        for (handle, payload) in &self.handles {
            map.insert(handle.clone(), payload.clone());
        }
        if let Some(main) = &self.main {
            map.insert(MAIN_HANDLE.to_string(), main.clone());
            map.insert("json".to_string(), main.clone());
        }
        Value::Object(map)
    }
}

/// Run-scoped data handed to executors
#[derive(Debug)]
pub struct RuntimeContext<'a> {
    pub workflow_id: &'a str,
    pub execution_id: &'a str,
    pub trigger_data: &'a Value,
    pub credentials: &'a HashMap<String, String>,
    pub node_results: &'a NodeResults,
    /// `{execution: {id, mode}, workflow: {id, name}}`
    pub vars: &'a Value,
    chat_response: OnceLock<String>,
}

impl<'a> RuntimeContext<'a> {
    pub fn new(
        workflow_id: &'a str,
        execution_id: &'a str,
        trigger_data: &'a Value,
        credentials: &'a HashMap<String, String>,
        node_results: &'a NodeResults,
        vars: &'a Value,
    ) -> Self {
        Self {
            workflow_id,
            execution_id,
            trigger_data,
            credentials,
            node_results,
            vars,
            chat_response: OnceLock::new(),
        }
    }

    /// Non-empty credential by key
    pub fn credential(&self, key: &str) -> Option<&'a str> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .filter(|secret| !secret.is_empty())
    }

    /// Side channel for chat output nodes; the first value set wins
    pub fn set_chat_response(&self, response: impl Into<String>) {
        let _ = self.chat_response.set(response.into());
    }

    pub fn take_chat_response(self) -> Option<String> {
        self.chat_response.into_inner()
    }

    /// Mapping handed to dynamic node handlers
    pub fn to_value(&self) -> Value {
        json!({
            "workflow_id": self.workflow_id,
            "execution_id": self.execution_id,
            "trigger_data": self.trigger_data,
            "vars": self.vars,
        })
    }
}

/// Built-in executor categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    Trigger,
    Ai,
    Flow,
    Data,
    Action,
    Output,
}

impl NodeCategory {
    /// Fixed type -> category table of built-in node types
    pub fn of(node_type: &str) -> Option<Self> {
        let category = match node_type {
            "when-chat-received" | "webhook" | "schedule" | "manual-trigger" => Self::Trigger,
            "ai-agent" | "openai" | "anthropic" | "google-gemini" | "groq-llama" | "groq-gemma"
            | "gpt-4-turbo" | "gpt-3.5-turbo" | "claude-3-opus" | "claude-3-sonnet"
            | "question-answer-chain" | "summarization-chain" | "information-extractor"
            | "text-classifier" | "sentiment-analysis" => Self::Ai,
            "if-else" | "switch" | "merge" => Self::Flow,
            "filter" | "edit-fields" | "code" | "text-transform" | "notes" => Self::Data,
            "http-request" | "google-sheets" => Self::Action,
            "respond-to-chat" | "readme-viewer" => Self::Output,
            _ => return None,
        };
        Some(category)
    }
}

/// Whether a built-in node type declares the named output handle
///
/// Unknown and dynamic types answer `true`; switch handles depend on its cases.
pub fn declares_output(node_type: &str, handle: &str) -> bool {
    match node_type {
        "if-else" => matches!(handle, "main" | "true" | "false"),
        "switch" => handle == MAIN_HANDLE || handle == "fallback" || handle.starts_with("output"),
        _ => true,
    }
}

/// Selects an executor for a node type
pub struct NodeDispatcher {
    registry: Arc<NodeRegistry>,
    builtins: HashMap<NodeCategory, Arc<dyn NodeExecutor>>,
}

impl NodeDispatcher {
    pub fn new(
        registry: Arc<NodeRegistry>,
        config: &EngineConfig,
        language_model: Option<Arc<dyn LanguageModel>>,
    ) -> Result<Self> {
        let mut builtins: HashMap<NodeCategory, Arc<dyn NodeExecutor>> = HashMap::new();
        builtins.insert(NodeCategory::Trigger, Arc::new(trigger::TriggerExecutor));
        builtins.insert(NodeCategory::Ai, Arc::new(ai::AiExecutor::new(language_model)));
        builtins.insert(NodeCategory::Flow, Arc::new(flow::FlowExecutor));
        builtins.insert(NodeCategory::Data, Arc::new(data::DataExecutor::new(config.max_lua_memory_bytes)));
        builtins.insert(NodeCategory::Action, Arc::new(action::ActionExecutor::new(config.http_timeout_secs)?));
        builtins.insert(NodeCategory::Output, Arc::new(output::OutputExecutor));

        Ok(Self { registry, builtins })
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Dynamic registry first, then the built-in category table
    pub fn select(&self, node_type: &str) -> Result<Arc<dyn NodeExecutor>, EngineError> {
        if let Some(node) = self.registry.get(node_type) {
            tracing::debug!("🧩 Using dynamic executor for {}", node_type);
            return Ok(Arc::new(DynamicNodeExecutor::new(node)));
        }

        NodeCategory::of(node_type)
            .and_then(|category| self.builtins.get(&category))
            .cloned()
            .ok_or_else(|| EngineError::UnknownNodeType(node_type.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Owned backing data for a `RuntimeContext` in executor tests
    pub struct Fixture {
        pub trigger_data: Value,
        pub credentials: HashMap<String, String>,
        pub node_results: NodeResults,
        pub vars: Value,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                trigger_data: json!({}),
                credentials: HashMap::new(),
                node_results: HashMap::new(),
                vars: json!({"execution": {"id": "exec-1", "mode": "test"}, "workflow": {"id": "wf-1", "name": "Workflow"}}),
            }
        }

        pub fn context(&self) -> RuntimeContext<'_> {
            RuntimeContext::new(
                "wf-1",
                "exec-1",
                &self.trigger_data,
                &self.credentials,
                &self.node_results,
                &self.vars,
            )
        }
    }

    pub fn props(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn main_input(value: Value) -> NodeInputs {
        NodeInputs {
            main: Some(value),
            ..Default::default()
        }
    }

    pub async fn run(
        executor: &dyn NodeExecutor,
        node_type: &str,
        properties: Value,
        inputs: &NodeInputs,
        fixture: &Fixture,
    ) -> Result<Value> {
        let properties = props(properties);
        let call = NodeCall::new("node-1", node_type, &properties);
        let ctx = fixture.context();
        executor.execute(&call, inputs, &ctx).await
    }
}

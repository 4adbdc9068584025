/// Dynamic tool registry
///
/// Tools are callable helpers (weather lookups, text statistics, ...) that
/// agent-style nodes and the HTTP API can invoke by id. Same ArcSwap layout as
/// the node registry.

use anyhow::Result;
use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use crate::workflow::registry::{ArgSpec, NodeParameter, ParameterSchema};

pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Registered tool
#[derive(Clone)]
pub struct DynamicTool {
    pub id: String,
    /// Function-style name exposed to language models (e.g. "text_analyzer")
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub parameters: Vec<NodeParameter>,
    pub handler: ToolHandler,
}

impl fmt::Debug for DynamicTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicTool")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl DynamicTool {
    /// Tool whose parameter schema is derived from its argument descriptions
    pub fn new<F, Fut>(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        args: &[ArgSpec],
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            version: "1.0.0".to_string(),
            author: "Agent Flow".to_string(),
            parameters: ParameterSchema::derive(args),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn to_catalog(&self) -> Value {
        let parameters: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), json!({ "type": p.kind, "required": p.required })))
            .collect();

        json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "parameters": parameters,
            "version": self.version,
            "author": self.author,
        })
    }
}

/// Lock-free registry of dynamic tools
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: ArcSwap<HashMap<String, Arc<DynamicTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: DynamicTool) {
        let id = tool.id.clone();
        let current = self.tools.load();
        let mut next = (**current).clone();
        next.insert(id.clone(), Arc::new(tool));
        self.tools.store(Arc::new(next));
        tracing::info!("🛠️ Registered dynamic tool: {}", id);
    }

    pub fn get(&self, tool_id: &str) -> Option<Arc<DynamicTool>> {
        self.tools.load().get(tool_id).cloned()
    }

    /// Invoke a tool with a JSON object of arguments
    ///
    /// Required parameters missing from `args` are rejected before the handler runs.
    pub async fn invoke(&self, tool_id: &str, args: Value) -> Result<Value> {
        let tool = self
            .get(tool_id)
            .ok_or_else(|| anyhow::anyhow!("Tool not found: {}", tool_id))?;

        let missing: Vec<&str> = tool
            .parameters
            .iter()
            .filter(|p| p.required && args.get(&p.name).map_or(true, Value::is_null))
            .map(|p| p.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(anyhow::anyhow!(
                "Tool '{}' missing required arguments: {}",
                tool_id,
                missing.join(", ")
            ));
        }

        tracing::debug!("🛠️ Invoking tool {} with {}", tool_id, args);
        (tool.handler)(args).await
    }

    pub fn to_catalog(&self) -> Vec<Value> {
        let tools = self.tools.load();
        let mut entries: Vec<&Arc<DynamicTool>> = tools.values().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.into_iter().map(|tool| tool.to_catalog()).collect()
    }
}

/// Dynamic node registry using ArcSwap
///
/// Custom node authors register node types once at process start. Lookups
/// during execution are lock-free reads; each registration swaps the whole
/// map pointer so concurrent runs never block on the registry.

use anyhow::Result;
use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use crate::workflow::types::MAIN_HANDLE;

/// Semantic type of a declared node parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Text,
    Number,
    Boolean,
    Select,
    #[serde(rename = "textarea")]
    MultilineText,
    Json,
    Expression,
}

/// Declared parameter of a dynamic node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeParameter {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    pub required: bool,
    pub default: Value,
    pub description: String,
    pub options: Vec<Value>,
    pub placeholder: String,
}

impl NodeParameter {
    /// Optional parameter with a label derived from its name
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        let name = name.into();
        Self {
            label: title_case(&name),
            name,
            kind,
            required: false,
            default: Value::Null,
            description: String::new(),
            options: Vec::new(),
            placeholder: String::new(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn options<I, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }
}

/// Structural type annotation of a handler argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgAnnotation {
    Integer,
    Float,
    Boolean,
    Mapping,
    Sequence,
    String,
    Unannotated,
}

/// Structurally-typed description of one handler argument
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub annotation: ArgAnnotation,
    pub default: Option<Value>,
}

impl ArgSpec {
    pub fn new(name: impl Into<String>, annotation: ArgAnnotation) -> Self {
        Self {
            name: name.into(),
            annotation,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Convenience layer that turns argument descriptions into a parameter schema
pub struct ParameterSchema;

impl ParameterSchema {
    /// Arguments named `inputs`/`context` are supplied by the engine and skipped.
    /// An argument without a default is required.
    pub fn derive(args: &[ArgSpec]) -> Vec<NodeParameter> {
        args.iter()
            .filter(|arg| !matches!(arg.name.as_str(), "self" | "inputs" | "context"))
            .map(|arg| {
                let kind = match arg.annotation {
                    ArgAnnotation::Integer | ArgAnnotation::Float => ParameterType::Number,
                    ArgAnnotation::Boolean => ParameterType::Boolean,
                    ArgAnnotation::Mapping | ArgAnnotation::Sequence => ParameterType::Json,
                    ArgAnnotation::String | ArgAnnotation::Unannotated => ParameterType::Text,
                };
                let mut param = NodeParameter::new(&arg.name, kind);
                match &arg.default {
                    Some(default) => param.default = default.clone(),
                    None => param.required = true,
                }
                param
            })
            .collect()
    }
}

/// Arguments handed to a dynamic node handler at call time
#[derive(Debug, Clone)]
pub struct DynamicInvocation {
    /// Aggregated node inputs (`main`, `json`, named handles, per-source payloads)
    pub inputs: Value,
    /// Run identifiers, trigger payload and workflow variables
    pub context: Value,
    /// Declared parameters, resolved against the node's properties
    pub params: Map<String, Value>,
}

impl DynamicInvocation {
    pub fn param(&self, name: &str) -> &Value {
        self.params.get(name).unwrap_or(&Value::Null)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).as_str()
    }

    pub fn main_input(&self) -> &Value {
        self.inputs.get(MAIN_HANDLE).unwrap_or(&Value::Null)
    }
}

/// Bound handler of a dynamic node
pub type NodeHandler =
    Arc<dyn Fn(DynamicInvocation) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Registered node type supplied by external code
#[derive(Clone)]
pub struct DynamicNode {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub icon: String,
    pub color: String,
    pub parameters: Vec<NodeParameter>,
    pub input_handles: Vec<String>,
    pub output_handles: Vec<String>,
    pub handler: NodeHandler,
}

impl fmt::Debug for DynamicNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl DynamicNode {
    pub fn builder(id: impl Into<String>) -> DynamicNodeBuilder {
        DynamicNodeBuilder::new(id.into())
    }

    /// Frontend catalog entry for this node
    pub fn to_catalog(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "category": self.category,
            "icon": self.icon,
            "color": self.color,
            "nodeType": "custom",
            "parameters": self.parameters,
            "inputs": self.input_handles,
            "outputs": self.output_handles.iter().map(|handle| json!({
                "name": handle,
                "type": "main",
                "displayName": "Output",
            })).collect::<Vec<_>>(),
        })
    }
}

/// Registration-time builder for [`DynamicNode`]
pub struct DynamicNodeBuilder {
    id: String,
    name: Option<String>,
    description: String,
    category: String,
    icon: String,
    color: String,
    parameters: Vec<NodeParameter>,
    input_handles: Vec<String>,
    output_handles: Vec<String>,
    handler: Option<NodeHandler>,
}

impl DynamicNodeBuilder {
    fn new(id: String) -> Self {
        Self {
            id,
            name: None,
            description: String::new(),
            category: "Custom".to_string(),
            icon: "🔧".to_string(),
            color: "#6366f1".to_string(),
            parameters: Vec::new(),
            input_handles: vec![MAIN_HANDLE.to_string()],
            output_handles: vec![MAIN_HANDLE.to_string()],
            handler: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn parameter(mut self, parameter: NodeParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Append parameters derived from structural argument descriptions
    pub fn derive_parameters(mut self, args: &[ArgSpec]) -> Self {
        self.parameters.extend(ParameterSchema::derive(args));
        self
    }

    pub fn input_handles<I: IntoIterator<Item = S>, S: Into<String>>(mut self, handles: I) -> Self {
        self.input_handles = handles.into_iter().map(Into::into).collect();
        self
    }

    pub fn output_handles<I: IntoIterator<Item = S>, S: Into<String>>(mut self, handles: I) -> Self {
        self.output_handles = handles.into_iter().map(Into::into).collect();
        self
    }

    /// Bind an asynchronous handler
    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(DynamicInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |invocation| Box::pin(handler(invocation))));
        self
    }

    /// Bind a synchronous handler
    pub fn sync_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(DynamicInvocation) -> Result<Value> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.handler = Some(Arc::new(move |invocation| {
            let handler = Arc::clone(&handler);
            Box::pin(async move { handler(invocation) })
        }));
        self
    }

    pub fn build(self) -> Result<DynamicNode> {
        if self.id.trim().is_empty() {
            return Err(anyhow::anyhow!("Dynamic node id cannot be empty"));
        }
        let handler = self
            .handler
            .ok_or_else(|| anyhow::anyhow!("Dynamic node '{}' has no handler", self.id))?;

        Ok(DynamicNode {
            name: self.name.unwrap_or_else(|| title_case(&self.id)),
            id: self.id,
            description: self.description,
            category: self.category,
            icon: self.icon,
            color: self.color,
            parameters: self.parameters,
            input_handles: self.input_handles,
            output_handles: self.output_handles,
            handler,
        })
    }
}

/// Lock-free registry of dynamic node types
#[derive(Debug, Default)]
pub struct NodeRegistry {
    /// Key: node type identifier
    nodes: ArcSwap<HashMap<String, Arc<DynamicNode>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a dynamic node type
    pub fn register(&self, node: DynamicNode) {
        let id = node.id.clone();
        let current = self.nodes.load();
        let mut next = (**current).clone();
        if next.insert(id.clone(), Arc::new(node)).is_some() {
            tracing::warn!("⚠️ Replacing already registered dynamic node: {}", id);
        }
        self.nodes.store(Arc::new(next));
        tracing::info!("🧩 Registered dynamic node: {}", id);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<DynamicNode>> {
        self.nodes.load().get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.nodes.load().contains_key(node_type)
    }

    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Catalog of all registered nodes, ordered by id
    pub fn to_catalog(&self) -> Vec<Value> {
        let nodes = self.nodes.load();
        let mut entries: Vec<&Arc<DynamicNode>> = nodes.values().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.into_iter().map(|node| node.to_catalog()).collect()
    }
}

/// "json_path" -> "Json Path"
pub(crate) fn title_case(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_node(id: &str) -> DynamicNode {
        DynamicNode::builder(id)
            .name("Echo")
            .sync_handler(|invocation| Ok(invocation.main_input().clone()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_derive_maps_annotations_to_semantic_types() {
        let params = ParameterSchema::derive(&[
            ArgSpec::new("inputs", ArgAnnotation::Mapping),
            ArgSpec::new("context", ArgAnnotation::Mapping),
            ArgSpec::new("count", ArgAnnotation::Integer),
            ArgSpec::new("ratio", ArgAnnotation::Float).with_default(0.5),
            ArgSpec::new("enabled", ArgAnnotation::Boolean).with_default(false),
            ArgSpec::new("payload", ArgAnnotation::Mapping).with_default(json!({})),
            ArgSpec::new("items", ArgAnnotation::Sequence).with_default(json!([])),
            ArgSpec::new("json_path", ArgAnnotation::Unannotated),
        ]);

        let kinds: Vec<_> = params.iter().map(|p| (p.name.as_str(), p.kind, p.required)).collect();
        assert_eq!(
            kinds,
            vec![
                ("count", ParameterType::Number, true),
                ("ratio", ParameterType::Number, false),
                ("enabled", ParameterType::Boolean, false),
                ("payload", ParameterType::Json, false),
                ("items", ParameterType::Json, false),
                ("json_path", ParameterType::Text, true),
            ]
        );
        assert_eq!(params[5].label, "Json Path");
        assert_eq!(params[1].default, json!(0.5));
    }

    #[test]
    fn test_builder_requires_handler() {
        let err = DynamicNode::builder("no-handler").build().unwrap_err();
        assert!(err.to_string().contains("no handler"));
    }

    #[test]
    fn test_registry_lookup_and_catalog() {
        let registry = NodeRegistry::new();
        assert!(registry.is_empty());

        registry.register(echo_node("b-echo"));
        registry.register(echo_node("a-echo"));

        assert!(registry.contains("a-echo"));
        assert!(registry.get("missing").is_none());

        let catalog = registry.to_catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0]["id"], "a-echo");
        assert_eq!(catalog[0]["nodeType"], "custom");
        assert_eq!(catalog[0]["outputs"][0]["name"], "main");
    }

    #[test]
    fn test_parameter_type_wire_names() {
        assert_eq!(serde_json::to_value(ParameterType::MultilineText).unwrap(), "textarea");
        assert_eq!(serde_json::to_value(ParameterType::Json).unwrap(), "json");
    }

    #[tokio::test]
    async fn test_async_handler_is_invoked() {
        let node = DynamicNode::builder("doubler")
            .handler(|invocation: DynamicInvocation| async move {
                let n = invocation.param("n").as_f64().unwrap_or(0.0);
                Ok(json!(n * 2.0))
            })
            .build()
            .unwrap();

        let mut params = Map::new();
        params.insert("n".into(), json!(21));
        let result = (node.handler)(DynamicInvocation {
            inputs: json!({}),
            context: json!({}),
            params,
        })
        .await
        .unwrap();
        assert_eq!(result, json!(42.0));
    }
}

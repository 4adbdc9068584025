/// Core workflow type definitions
///
/// Defines the wire shapes the engine accepts from its caller: nodes, edges,
/// and the uniform node output. These types are serialized/deserialized from
/// the JSON the canvas produces.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Name of the default input/output handle
pub const MAIN_HANDLE: &str = "main";

/// A single node in the workflow graph
///
/// Wire shape: `{ "id": "n1", "data": { "type": "filter", "properties": {...} } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (caller-assigned)
    pub id: String,
    /// Type tag and configuration
    pub data: NodeData,
}

/// Type tag plus property bag of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeData {
    /// Built-in type tag (e.g. "webhook", "filter") or a registered dynamic node id
    #[serde(rename = "type")]
    pub node_type: String,
    /// Display label from the canvas, unused by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Named parameters; values may be literals or `${{ }}` expression strings
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: NodeData {
                node_type: node_type.into(),
                ..Default::default()
            },
        }
    }

    /// Builder-style property setter, mostly for tests and sample graphs
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.properties.insert(key.into(), value.into());
        self
    }

    pub fn node_type(&self) -> &str {
        &self.data.node_type
    }
}

/// Directed dependency between two nodes' handles
///
/// Wire shape: `{ "source": "a", "target": "b", "sourceHandle": "main", "targetHandle": "main" }`.
/// Absent or `null` handles mean `main`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Source node ID
    pub source: String,
    /// Target node ID
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    /// Edge between the `main` handles of two nodes
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_handles(mut self, source_handle: &str, target_handle: &str) -> Self {
        self.source_handle = Some(source_handle.to_string());
        self.target_handle = Some(target_handle.to_string());
        self
    }

    pub fn source_handle(&self) -> &str {
        self.source_handle.as_deref().unwrap_or(MAIN_HANDLE)
    }

    pub fn target_handle(&self) -> &str {
        self.target_handle.as_deref().unwrap_or(MAIN_HANDLE)
    }
}

/// Uniform executor return shape: handle name -> payload, always holding `main`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeOutput(Map<String, Value>);

impl NodeOutput {
    /// Normalize an arbitrary executor return value
    ///
    /// Non-mappings become `{main: value}`; mappings lacking `main` are wrapped
    /// whole as `{main: mapping}`; mappings with `main` are kept unchanged.
    pub fn normalize(value: Value) -> Self {
        match value {
            Value::Object(map) if map.contains_key(MAIN_HANDLE) => Self(map),
            other => {
                let mut map = Map::new();
                map.insert(MAIN_HANDLE.to_string(), other);
                Self(map)
            }
        }
    }

    /// Payload on the `main` handle
    pub fn main(&self) -> &Value {
        self.0.get(MAIN_HANDLE).unwrap_or(&Value::Null)
    }

    /// Payload on a named handle, if the output declares it
    pub fn handle(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Results of all executed nodes in a run, keyed by node id
pub type NodeResults = HashMap<String, NodeOutput>;

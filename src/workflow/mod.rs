/// Workflow Definition Layer
///
/// Graph data model (nodes, edges, outputs) plus the lock-free registries of
/// dynamically registered nodes and tools.

pub mod custom;
pub mod registry;
pub mod tools;
pub mod types;

pub use registry::{DynamicNode, NodeRegistry};
pub use tools::{DynamicTool, ToolRegistry};
pub use types::{Edge, Node, NodeOutput};

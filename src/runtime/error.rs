use thiserror::Error;

/// Fatal engine errors; each aborts the node it occurs in and, through the
/// run-level driver, the whole run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Node type matches neither the dynamic registry nor a built-in category
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Topological sort could not order every node
    #[error("Workflow contains cycles or unreachable nodes")]
    WorkflowCycle,

    /// Edge or start node references a node that does not exist, or ids collide
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    /// Domain problem raised by a built-in executor
    #[error("{message}")]
    NodeExecution { node_type: String, message: String },

    /// Failure inside a registered dynamic node handler
    #[error("Dynamic node execution failed ({node_type}): {message}")]
    DynamicHandler { node_type: String, message: String },
}

impl EngineError {
    pub fn node(node_type: &str, message: impl Into<String>) -> Self {
        Self::NodeExecution {
            node_type: node_type.to_string(),
            message: message.into(),
        }
    }
}

/// Agent Flow: visual-workflow automation engine
///
/// Executes node graphs in dependency order, wiring node outputs into later
/// nodes through `${{ }}` expressions, with dynamically registered node types.

// Environment-driven configuration
pub mod config;

// Workflow data model and dynamic node/tool registries
pub mod workflow;

// Execution engine, node executors and expression evaluator
pub mod runtime;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

pub use runtime::{ExecutionContext, ExecutionEngine, RunRequest};
pub use server::start_server;
pub use workflow::{Edge, Node, NodeOutput};

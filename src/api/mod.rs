/// HTTP API Layer
///
/// Thin axum surface over the engine:
/// - Run execution and stored run lookup
/// - Catalogs of dynamic nodes and tools, plus tool invocation

// Run execution endpoints
pub mod executions;

// Dynamic node and tool catalogs
pub mod catalog;

use crate::{runtime::ExecutionEngine, workflow::ToolRegistry};
use std::sync::Arc;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ExecutionEngine>,
    pub tools: Arc<ToolRegistry>,
}

pub use catalog::create_catalog_routes;
pub use executions::create_execution_routes;

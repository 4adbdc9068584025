/// Runtime Execution Engine
///
/// Dependency-ordered execution of node graphs:
/// - Expression evaluation over prior node outputs
/// - Per-type node executors and dynamic node dispatch
/// - Per-run execution context, progress events and run store

pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod expression;
pub mod nodes;
pub mod store;

pub use context::{ExecutionContext, ExecutionSnapshot, NodeStatus, RunStatus};
pub use engine::{ExecutionEngine, RunRequest};
pub use error::EngineError;
pub use events::{ExecutionListener, ProgressEvent, ProgressSink};
pub use store::{InMemoryRunStore, RunStore};

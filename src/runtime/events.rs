/// Progress events and run-completion listeners

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{runtime::context::ExecutionSnapshot, workflow::types::NodeOutput};

/// Incremental progress of a run, tagged by `type` on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    NodeStart {
        node_id: String,
        /// Percent of the planned nodes already finished
        progress: f64,
    },
    NodeComplete {
        node_id: String,
        result: Option<NodeOutput>,
        progress: f64,
    },
    WorkflowComplete {
        context: Box<ExecutionSnapshot>,
    },
    WorkflowError {
        error: String,
    },
}

/// Receiver of progress events; each emit is awaited before dispatch continues
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent) -> BoxFuture<'_, ()>;
}

impl ProgressSink for mpsc::Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.send(event).await.is_err() {
                tracing::debug!("📭 Progress receiver dropped, event discarded");
            }
        })
    }
}

/// Notified once per finished run (completed or failed)
pub trait ExecutionListener: Send + Sync {
    fn on_execution_complete(&self, snapshot: &ExecutionSnapshot);
}

/// Per-run execution state
///
/// One `ExecutionContext` exists per run. It is mutated only by the task that
/// drives that run and is handed back to the caller (and the run store) when
/// the run finishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::workflow::types::{NodeOutput, NodeResults};

/// Per-node execution status; transitions pending -> running -> completed|error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl NodeStatus {
    fn rank(self) -> u8 {
        match self {
            NodeStatus::Pending => 0,
            NodeStatus::Running => 1,
            NodeStatus::Completed | NodeStatus::Error => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
}

/// Execution-state record of one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    pub status: NodeStatus,
    /// Time of the latest state change
    pub timestamp: DateTime<Utc>,
    /// Set once, on the first state change of this node
    pub start_time: DateTime<Utc>,
    /// Stamped on every state change
    pub end_time: DateTime<Utc>,
    pub output: Option<Value>,
    pub input: Option<Value>,
    pub error: Option<String>,
}

/// Optional fields merged into a node's state by [`ExecutionContext::set_node_state`]
#[derive(Debug, Clone, Default)]
pub struct StateExtra {
    pub output: Option<Value>,
    pub input: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: String,
    pub node_results: NodeResults,
    pub node_states: HashMap<String, NodeState>,
    /// Node ids in dispatch order; each id at most once
    pub execution_order: Vec<String>,
    pub errors: HashMap<String, String>,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub trigger_data: Value,
    pub credentials: HashMap<String, String>,
    pub chat_response: Option<String>,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            node_results: HashMap::new(),
            node_states: HashMap::new(),
            execution_order: Vec::new(),
            errors: HashMap::new(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            trigger_data: Value::Object(Map::new()),
            credentials: HashMap::new(),
            chat_response: None,
        }
    }

    /// Merge `extra` into the node's state and stamp the time
    ///
    /// The start time is recorded only on the first call for a node. A
    /// transition that would move the status backwards is ignored.
    pub fn set_node_state(&mut self, node_id: &str, status: NodeStatus, extra: StateExtra) {
        let now = Utc::now();

        match self.node_states.get_mut(node_id) {
            Some(state) => {
                if status.rank() < state.status.rank() || (state.status.is_terminal() && status != state.status) {
                    tracing::warn!(
                        "⚠️ Ignoring state regression for node {}: {:?} -> {:?}",
                        node_id,
                        state.status,
                        status
                    );
                    return;
                }
                state.status = status;
                state.timestamp = now;
                state.end_time = now;
                if extra.output.is_some() {
                    state.output = extra.output;
                }
                if extra.input.is_some() {
                    state.input = extra.input;
                }
                if extra.error.is_some() {
                    state.error = extra.error;
                }
            }
            None => {
                self.node_states.insert(
                    node_id.to_string(),
                    NodeState {
                        status,
                        timestamp: now,
                        start_time: now,
                        end_time: now,
                        output: extra.output,
                        input: extra.input,
                        error: extra.error,
                    },
                );
            }
        }
    }

    pub fn set_node_result(&mut self, node_id: &str, output: NodeOutput) {
        self.node_results.insert(node_id.to_string(), output);
    }

    pub fn node_result(&self, node_id: &str) -> Option<&NodeOutput> {
        self.node_results.get(node_id)
    }

    pub fn set_node_error(&mut self, node_id: &str, error: impl Into<String>) {
        let error = error.into();
        self.errors.insert(node_id.to_string(), error.clone());
        self.set_node_state(
            node_id,
            NodeStatus::Error,
            StateExtra {
                error: Some(error),
                ..Default::default()
            },
        );
    }

    /// Status of a node; nodes never touched are pending
    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        self.node_states
            .get(node_id)
            .map(|state| state.status)
            .unwrap_or(NodeStatus::Pending)
    }

    /// `end_time - start_time` in milliseconds, 0 when the node has no state
    pub fn node_duration_ms(&self, node_id: &str) -> f64 {
        self.node_states
            .get(node_id)
            .map(|state| millis(state.end_time) - millis(state.start_time))
            .unwrap_or(0.0)
    }

    pub fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }

    /// Serialization view for API responses and listeners
    pub fn snapshot(&self) -> ExecutionSnapshot {
        let duration = self
            .end_time
            .map(|end| (end - self.start_time).num_microseconds().unwrap_or_default() as f64 / 1_000_000.0);

        let node_states = self
            .node_states
            .iter()
            .map(|(id, state)| {
                let duration_ms = self.node_duration_ms(id);
                let view = NodeStateView {
                    status: state.status,
                    timestamp: state.timestamp.to_rfc3339(),
                    start_time: millis(state.start_time),
                    end_time: millis(state.end_time),
                    duration: duration_ms,
                    duration_ms,
                    duration_seconds: if duration_ms > 0.0 { duration_ms / 1000.0 } else { 0.0 },
                    output: state.output.clone(),
                    input: state.input.clone(),
                    error: state.error.clone(),
                };
                (id.clone(), view)
            })
            .collect();

        ExecutionSnapshot {
            execution_id: self.execution_id.clone(),
            workflow_id: self.workflow_id.clone(),
            status: self.status,
            start_time: self.start_time.to_rfc3339(),
            end_time: self.end_time.map(|t| t.to_rfc3339()),
            duration,
            execution_order: self.execution_order.clone(),
            node_states,
            node_results: self.node_results.clone(),
            errors: self.errors.clone(),
            chat_response: self.chat_response.clone(),
        }
    }
}

fn millis(time: DateTime<Utc>) -> f64 {
    time.timestamp_micros() as f64 / 1000.0
}

/// Serialized node state, enriched with durations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStateView {
    pub status: NodeStatus,
    pub timestamp: String,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub duration_ms: f64,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serialized run result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    pub start_time: String,
    pub end_time: Option<String>,
    /// Seconds between start and end, once the run is complete
    pub duration: Option<f64>,
    pub execution_order: Vec<String>,
    pub node_states: HashMap<String, NodeStateView>,
    pub node_results: NodeResults,
    pub errors: HashMap<String, String>,
    pub chat_response: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_context_is_running_and_empty() {
        let ctx = ExecutionContext::new("wf", "exec");
        assert_eq!(ctx.status, RunStatus::Running);
        assert!(ctx.node_states.is_empty());
        assert!(ctx.execution_order.is_empty());
        assert_eq!(ctx.node_status("n1"), NodeStatus::Pending);
    }

    #[test]
    fn test_start_time_recorded_once() {
        let mut ctx = ExecutionContext::new("wf", "exec");
        ctx.set_node_state("n1", NodeStatus::Running, StateExtra::default());
        let first_start = ctx.node_states["n1"].start_time;

        std::thread::sleep(std::time::Duration::from_millis(5));
        ctx.set_node_state(
            "n1",
            NodeStatus::Completed,
            StateExtra {
                output: Some(json!({"main": 1})),
                ..Default::default()
            },
        );

        let state = &ctx.node_states["n1"];
        assert_eq!(state.start_time, first_start);
        assert!(state.end_time > first_start);
        assert_eq!(state.output, Some(json!({"main": 1})));
        assert!(ctx.node_duration_ms("n1") >= 5.0);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut ctx = ExecutionContext::new("wf", "exec");
        ctx.set_node_state("n1", NodeStatus::Running, StateExtra::default());
        ctx.set_node_state("n1", NodeStatus::Completed, StateExtra::default());
        ctx.set_node_state("n1", NodeStatus::Running, StateExtra::default());
        ctx.set_node_state("n1", NodeStatus::Error, StateExtra::default());
        assert_eq!(ctx.node_status("n1"), NodeStatus::Completed);
    }

    #[test]
    fn test_set_node_error_records_both_maps() {
        let mut ctx = ExecutionContext::new("wf", "exec");
        ctx.set_node_state("n1", NodeStatus::Running, StateExtra::default());
        ctx.set_node_error("n1", "boom");

        assert_eq!(ctx.errors["n1"], "boom");
        assert_eq!(ctx.node_status("n1"), NodeStatus::Error);
        assert_eq!(ctx.node_states["n1"].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_duration_zero_for_unknown_node() {
        let ctx = ExecutionContext::new("wf", "exec");
        assert_eq!(ctx.node_duration_ms("ghost"), 0.0);
    }

    #[test]
    fn test_snapshot_shape() {
        let mut ctx = ExecutionContext::new("wf-1", "exec-1");
        ctx.set_node_state("n1", NodeStatus::Running, StateExtra::default());
        ctx.set_node_result("n1", NodeOutput::normalize(json!("hi")));
        ctx.set_node_state("n1", NodeStatus::Completed, StateExtra::default());
        ctx.execution_order.push("n1".into());
        ctx.complete(RunStatus::Completed);

        let json = serde_json::to_value(ctx.snapshot()).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["execution_id"], "exec-1");
        assert_eq!(json["execution_order"], json!(["n1"]));
        assert_eq!(json["node_results"]["n1"]["main"], "hi");
        assert_eq!(json["node_states"]["n1"]["status"], "completed");
        assert!(json["node_states"]["n1"].get("durationMs").is_some());
        assert!(json["node_states"]["n1"].get("output").is_none());
        assert!(json["duration"].as_f64().is_some());
        assert!(json["chat_response"].is_null());
    }
}

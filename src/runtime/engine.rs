/// Petgraph-based execution engine
///
/// Builds a directed graph from the run's nodes and edges, orders it with
/// Kahn's algorithm (FIFO queue, insertion order breaks ties), then dispatches
/// nodes strictly one at a time. Each node's inputs are aggregated from the
/// outputs its upstream nodes already recorded in the execution context.

use anyhow::Result;
use petgraph::{
    graph::{DiGraph, EdgeIndex, NodeIndex},
    visit::{Bfs, EdgeRef, Reversed},
    Direction,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use crate::{
    runtime::{
        context::{ExecutionContext, NodeStatus, RunStatus, StateExtra},
        error::EngineError,
        events::{ExecutionListener, ProgressEvent, ProgressSink},
        expression::EvalScope,
        nodes::{declares_output, NodeCall, NodeDispatcher, NodeInputs, RuntimeContext},
        store::RunStore,
    },
    workflow::{
        registry::NodeRegistry,
        types::{Edge, Node, NodeOutput, NodeResults, MAIN_HANDLE},
    },
};

const DEFAULT_TRIGGER_MESSAGE: &str = "Hello, how can I help you today?";

/// Everything needed to start one run
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub execution_id: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub trigger_data: Option<Value>,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    /// Partial run target; absent means a full run
    #[serde(default)]
    pub start_node_id: Option<String>,
    /// Partial runs also execute everything downstream of the target
    #[serde(default)]
    pub include_downstream: bool,
}

impl RunRequest {
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            nodes,
            edges,
            ..Default::default()
        }
    }

    pub fn with_trigger_data(mut self, trigger_data: Value) -> Self {
        self.trigger_data = Some(trigger_data);
        self
    }

    pub fn with_credential(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), secret.into());
        self
    }

    /// Execute only `node_id` and its transitive dependencies
    pub fn starting_at(mut self, node_id: impl Into<String>, include_downstream: bool) -> Self {
        self.start_node_id = Some(node_id.into());
        self.include_downstream = include_downstream;
        self
    }
}

/// Canned chat payload used when a run is started without trigger data
pub fn default_trigger_data() -> Value {
    json!({
        "message": DEFAULT_TRIGGER_MESSAGE,
        "text": DEFAULT_TRIGGER_MESSAGE,
        "user": "anonymous",
        "channel": "",
        "timestamp": "",
    })
}

/// Workflow as a petgraph DAG; edge weights keep the wire edge
struct WorkflowGraph<'w> {
    graph: DiGraph<&'w Node, &'w Edge>,
    node_id_to_index: HashMap<&'w str, NodeIndex>,
}

impl<'w> WorkflowGraph<'w> {
    fn build<N, E>(nodes: N, edges: E) -> Result<Self, EngineError>
    where
        N: IntoIterator<Item = &'w Node>,
        E: IntoIterator<Item = &'w Edge>,
    {
        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for node in nodes {
            let index = graph.add_node(node);
            if node_id_to_index.insert(node.id.as_str(), index).is_some() {
                return Err(EngineError::InvalidGraph(format!("Duplicate node id: {}", node.id)));
            }
        }

        for edge in edges {
            let from = *node_id_to_index
                .get(edge.source.as_str())
                .ok_or_else(|| EngineError::InvalidGraph(format!("Edge references unknown node: {}", edge.source)))?;
            let to = *node_id_to_index
                .get(edge.target.as_str())
                .ok_or_else(|| EngineError::InvalidGraph(format!("Edge references unknown node: {}", edge.target)))?;

            let source_type = graph[from].node_type();
            if !declares_output(source_type, edge.source_handle()) {
                tracing::warn!(
                    "⚠️ Edge {} -> {} uses output handle '{}' not declared by {}",
                    edge.source,
                    edge.target,
                    edge.source_handle(),
                    source_type
                );
            }
            graph.add_edge(from, to, edge);
        }

        Ok(Self { graph, node_id_to_index })
    }

    /// Kahn's algorithm; a short order means a cycle or unsatisfiable dependency
    fn topological_order(&self) -> Result<Vec<NodeIndex>, EngineError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|index| self.graph.edges_directed(index, Direction::Incoming).count())
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|index| in_degree[index.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.graph.node_count());

        while let Some(index) = queue.pop_front() {
            order.push(index);

            // petgraph walks outgoing edges newest-first; restore edge-list order
            let mut outgoing: Vec<(EdgeIndex, NodeIndex)> = self
                .graph
                .edges_directed(index, Direction::Outgoing)
                .map(|edge| (edge.id(), edge.target()))
                .collect();
            outgoing.sort_by_key(|(edge, _)| *edge);

            for (_, target) in outgoing {
                let degree = &mut in_degree[target.index()];
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(target);
                }
            }
        }

        if order.len() < self.graph.node_count() {
            return Err(EngineError::WorkflowCycle);
        }
        Ok(order)
    }

    /// `start` plus everything it transitively depends on
    fn upstream(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut found = HashSet::new();
        while let Some(index) = bfs.next(reversed) {
            found.insert(index);
        }
        found
    }

    /// `start` plus everything that transitively depends on it
    fn downstream(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let mut bfs = Bfs::new(&self.graph, start);
        let mut found = HashSet::new();
        while let Some(index) = bfs.next(&self.graph) {
            found.insert(index);
        }
        found
    }
}

/// Nodes to dispatch, in order, plus the edges among them
#[derive(Debug)]
pub struct ExecutionPlan<'r> {
    pub order: Vec<&'r Node>,
    pub edges: Vec<&'r Edge>,
}

impl ExecutionPlan<'_> {
    pub fn node_ids(&self) -> Vec<&str> {
        self.order.iter().map(|node| node.id.as_str()).collect()
    }
}

/// Compute the dispatch order of a full or partial run
///
/// A partial run keeps the target, its transitive upstream dependencies and,
/// when asked, its transitive downstream nodes; the restricted subgraph is
/// then sorted on its own.
pub fn plan_execution<'r>(
    nodes: &'r [Node],
    edges: &'r [Edge],
    start_node_id: Option<&str>,
    include_downstream: bool,
) -> Result<ExecutionPlan<'r>, EngineError> {
    let full = WorkflowGraph::build(nodes, edges)?;

    let Some(start_id) = start_node_id else {
        let order = full.topological_order()?;
        return Ok(ExecutionPlan {
            order: order.into_iter().map(|index| full.graph[index]).collect(),
            edges: edges.iter().collect(),
        });
    };

    let start = *full
        .node_id_to_index
        .get(start_id)
        .ok_or_else(|| EngineError::InvalidGraph(format!("Start node not found: {}", start_id)))?;

    let mut selected = full.upstream(start);
    if include_downstream {
        selected.extend(full.downstream(start));
    }
    let selected_ids: HashSet<&str> = selected.iter().map(|index| full.graph[*index].id.as_str()).collect();

    tracing::debug!("🎯 Partial run from {} covers {} of {} nodes", start_id, selected_ids.len(), nodes.len());

    let sub_nodes: Vec<&Node> = nodes.iter().filter(|node| selected_ids.contains(node.id.as_str())).collect();
    let sub_edges: Vec<&Edge> = edges
        .iter()
        .filter(|edge| selected_ids.contains(edge.source.as_str()) && selected_ids.contains(edge.target.as_str()))
        .collect();

    let sub = WorkflowGraph::build(sub_nodes.iter().copied(), sub_edges.iter().copied())?;
    let order = sub.topological_order()?;
    Ok(ExecutionPlan {
        order: order.into_iter().map(|index| sub.graph[index]).collect(),
        edges: sub_edges,
    })
}

/// Aggregate a node's inputs from the outputs its upstream nodes recorded
///
/// A single edge into `main` is used as-is. Several edges into `main` merge:
/// mapping payloads are shallow-merged in edge order (later keys win), other
/// payloads are stored under their source node id. Other target handles are
/// stored under their handle name.
pub fn gather_inputs(node_id: &str, edges: &[&Edge], results: &NodeResults) -> NodeInputs {
    let mut inputs = NodeInputs::default();

    for edge in edges.iter().filter(|edge| edge.target == node_id) {
        let Some(output) = results.get(&edge.source) else {
            continue;
        };
        let payload = output
            .handle(edge.source_handle())
            .cloned()
            .unwrap_or_else(|| output.to_value());

        if edge.target_handle() == MAIN_HANDLE {
            inputs.sources.push((edge.source.clone(), payload));
        } else {
            inputs.handles.insert(edge.target_handle().to_string(), payload);
        }
    }

    inputs.main = match inputs.sources.as_slice() {
        [] => None,
        [(_, only)] => Some(only.clone()),
        many => {
            let mut merged = Map::new();
            for (source, payload) in many {
                match payload {
                    Value::Object(fields) => merged.extend(fields.clone()),
                    other => {
                        merged.insert(source.clone(), other.clone());
                    }
                }
            }
            Some(Value::Object(merged))
        }
    };

    inputs
}

async fn emit(progress: Option<&dyn ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = progress {
        sink.emit(event).await;
    }
}

fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

/// Execution engine: one instance per process, shared by all runs
pub struct ExecutionEngine {
    dispatcher: NodeDispatcher,
    store: Arc<dyn RunStore>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    workflow_name: String,
}

impl ExecutionEngine {
    pub fn new(dispatcher: NodeDispatcher, store: Arc<dyn RunStore>, workflow_name: impl Into<String>) -> Self {
        Self {
            dispatcher,
            store,
            listeners: Vec::new(),
            workflow_name: workflow_name.into(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.dispatcher.registry()
    }

    fn vars(&self, ctx: &ExecutionContext) -> Value {
        json!({
            "execution": {"id": ctx.execution_id, "mode": "test"},
            "workflow": {"id": ctx.workflow_id, "name": self.workflow_name},
        })
    }

    /// Run a workflow to completion
    ///
    /// Never fails: the outcome is carried by the returned context's status,
    /// and a final `workflow_complete` or `workflow_error` event is emitted.
    pub async fn execute_workflow(&self, request: RunRequest, progress: Option<&dyn ProgressSink>) -> ExecutionContext {
        let workflow_start_time = std::time::Instant::now();
        let mut ctx = ExecutionContext::new(&request.workflow_id, &request.execution_id);
        ctx.trigger_data = match &request.trigger_data {
            Some(Value::Object(map)) if !map.is_empty() => Value::Object(map.clone()),
            Some(value) if !value.is_null() && !value.is_object() => value.clone(),
            _ => default_trigger_data(),
        };
        ctx.credentials = request.credentials.clone();
        self.store.save(ctx.snapshot()).await;

        tracing::info!(
            "🚀 Starting workflow execution: {} (execution: {}, {} nodes, {} edges)",
            request.workflow_id,
            request.execution_id,
            request.nodes.len(),
            request.edges.len()
        );

        match self.drive(&request, &mut ctx, progress).await {
            Ok(()) => {
                ctx.complete(RunStatus::Completed);
                tracing::info!(
                    "🎉 Workflow '{}' execution completed successfully in {:?}",
                    request.workflow_id,
                    workflow_start_time.elapsed()
                );
                emit(progress, ProgressEvent::WorkflowComplete { context: Box::new(ctx.snapshot()) }).await;
            }
            Err(e) => {
                ctx.complete(RunStatus::Error);
                tracing::error!("❌ Workflow '{}' execution failed: {}", request.workflow_id, e);
                emit(progress, ProgressEvent::WorkflowError { error: e.to_string() }).await;
            }
        }

        let snapshot = ctx.snapshot();
        self.store.save(snapshot.clone()).await;
        for listener in &self.listeners {
            listener.on_execution_complete(&snapshot);
        }
        ctx
    }

    async fn drive(
        &self,
        request: &RunRequest,
        ctx: &mut ExecutionContext,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<()> {
        let plan = plan_execution(
            &request.nodes,
            &request.edges,
            request.start_node_id.as_deref(),
            request.include_downstream,
        )?;
        tracing::debug!("📋 Execution order: {:?}", plan.node_ids());

        let total = plan.order.len();
        for (step, node) in plan.order.iter().enumerate() {
            emit(
                progress,
                ProgressEvent::NodeStart {
                    node_id: node.id.clone(),
                    progress: percent(step, total),
                },
            )
            .await;

            tracing::info!("📍 Step {}/{}: Executing node '{}' (type: {})", step + 1, total, node.id, node.node_type());
            self.execute_node(node, &plan.edges, ctx).await?;

            emit(
                progress,
                ProgressEvent::NodeComplete {
                    node_id: node.id.clone(),
                    result: ctx.node_result(&node.id).cloned(),
                    progress: percent(step + 1, total),
                },
            )
            .await;
        }
        Ok(())
    }

    /// Execute one node against the context and record the outcome
    ///
    /// Failures are recorded on the context before being returned.
    pub async fn execute_node(&self, node: &Node, edges: &[&Edge], ctx: &mut ExecutionContext) -> Result<NodeOutput> {
        let node_start_time = std::time::Instant::now();
        ctx.set_node_state(&node.id, NodeStatus::Running, StateExtra::default());

        match self.run_node(node, edges, ctx).await {
            Ok((output, inputs, chat_response)) => {
                ctx.set_node_result(&node.id, output.clone());
                ctx.set_node_state(
                    &node.id,
                    NodeStatus::Completed,
                    StateExtra {
                        output: Some(output.to_value()),
                        input: Some(inputs.to_value()),
                        error: None,
                    },
                );
                ctx.execution_order.push(node.id.clone());
                if chat_response.is_some() {
                    ctx.chat_response = chat_response;
                }
                tracing::info!("✅ Node '{}' completed in {:?}", node.id, node_start_time.elapsed());
                tracing::debug!("📤 Output data: {}", output.to_value());
                Ok(output)
            }
            Err(e) => {
                tracing::error!("❌ Node execution failed: {} - Error: {}", node.id, e);
                ctx.set_node_error(&node.id, e.to_string());
                Err(e)
            }
        }
    }

    async fn run_node(
        &self,
        node: &Node,
        edges: &[&Edge],
        ctx: &ExecutionContext,
    ) -> Result<(NodeOutput, NodeInputs, Option<String>)> {
        let inputs = gather_inputs(&node.id, edges, &ctx.node_results);
        tracing::debug!("📥 Input data for {}: {}", node.id, inputs.to_value());

        let vars = self.vars(ctx);
        let properties = EvalScope::new(&ctx.node_results, inputs.main(), &vars)
            .resolve_properties(&node.data.properties);

        let executor = self.dispatcher.select(node.node_type())?;
        let call = NodeCall::new(&node.id, node.node_type(), &properties);
        let runtime = RuntimeContext::new(
            &ctx.workflow_id,
            &ctx.execution_id,
            &ctx.trigger_data,
            &ctx.credentials,
            &ctx.node_results,
            &vars,
        );

        let raw = executor.execute(&call, &inputs, &runtime).await?;
        let chat_response = runtime.take_chat_response();
        Ok((NodeOutput::normalize(raw), inputs, chat_response))
    }
}

/// Run execution REST endpoints
///
/// Runs are executed synchronously within the request; the response is the
/// serialized execution context. Every run is also kept in the run store.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

use super::AppState;
use crate::runtime::{engine::RunRequest, ExecutionSnapshot};

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/executions", post(execute_workflow))
        .route("/api/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
}

/// Execute a workflow
///
/// POST /api/executions
/// Body: { "workflowId": "...", "nodes": [...], "edges": [...], "triggerData"?: {...},
///         "credentials"?: {...}, "startNodeId"?: "...", "includeDownstream"?: bool }
async fn execute_workflow(
    State(state): State<AppState>,
    Json(mut request): Json<RunRequest>,
) -> Result<Json<ExecutionSnapshot>, StatusCode> {
    if request.workflow_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if request.execution_id.is_empty() {
        request.execution_id = uuid::Uuid::new_v4().to_string();
    }

    tracing::info!("🌐 Execution requested for workflow {} ({})", request.workflow_id, request.execution_id);

    let ctx = state.engine.execute_workflow(request, None).await;
    Ok(Json(ctx.snapshot()))
}

/// GET /api/executions
async fn list_executions(State(state): State<AppState>) -> Json<Value> {
    let executions = state.engine.store().list().await;
    Json(json!({ "executions": executions }))
}

/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionSnapshot>, StatusCode> {
    state
        .engine
        .store()
        .get(&id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

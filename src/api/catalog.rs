/// Dynamic node and tool catalog endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

use super::AppState;

pub fn create_catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/nodes/custom", get(list_custom_nodes))
        .route("/api/tools", get(list_tools))
        .route("/api/tools/{id}/invoke", post(invoke_tool))
}

/// GET /api/nodes/custom
async fn list_custom_nodes(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "nodes": state.engine.registry().to_catalog() }))
}

/// GET /api/tools
async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": state.tools.to_catalog() }))
}

/// Invoke a tool by id
///
/// POST /api/tools/{id}/invoke
/// Body: { "<arg>": value, ... }
async fn invoke_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(args): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if state.tools.get(&id).is_none() {
        return Err((StatusCode::NOT_FOUND, Json(json!({ "error": format!("Tool not found: {}", id) }))));
    }

    match state.tools.invoke(&id, args).await {
        Ok(result) => Ok(Json(json!({ "tool_id": id, "result": result }))),
        Err(e) => {
            tracing::error!("❌ Tool {} failed: {}", id, e);
            Err((StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": e.to_string() }))))
        }
    }
}

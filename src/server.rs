/// Server setup and initialization
///
/// Wires together the registries, run store, execution engine and HTTP routes.

use crate::{
    api::{create_catalog_routes, create_execution_routes, AppState},
    config::Config,
    runtime::{
        engine::ExecutionEngine,
        nodes::{ai::HttpLanguageModel, LanguageModel, NodeDispatcher},
        store::InMemoryRunStore,
    },
    workflow::{custom::register_samples, registry::NodeRegistry, tools::ToolRegistry},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes
pub fn create_app(config: &Config) -> Result<Router> {
    tracing::info!("🧩 Registering sample dynamic nodes and tools");
    let node_registry = Arc::new(NodeRegistry::new());
    let tool_registry = Arc::new(ToolRegistry::new());
    register_samples(&node_registry, &tool_registry)?;

    tracing::info!("⚙️ Initializing node dispatcher");
    let language_model: Arc<dyn LanguageModel> = Arc::new(
        HttpLanguageModel::new(config.engine.http_timeout_secs)
            .map_err(|e| anyhow::anyhow!("Failed to initialize language model client: {}", e))?,
    );
    let dispatcher = NodeDispatcher::new(node_registry, &config.engine, Some(language_model))
        .map_err(|e| anyhow::anyhow!("Failed to initialize node dispatcher: {}", e))?;

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(
        dispatcher,
        Arc::new(InMemoryRunStore::new()),
        config.engine.workflow_name.clone(),
    ));

    let app_state = AppState {
        engine,
        tools: tool_registry,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_execution_routes())
        .merge(create_catalog_routes())
        .with_state(app_state);

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Agent Flow server...");

    let app = create_app(&config)?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

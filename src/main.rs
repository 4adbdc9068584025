/// Agent Flow server entry point
///
/// Serves:
/// - Run execution at /api/executions
/// - Dynamic node and tool catalogs at /api/nodes/custom and /api/tools
/// - Health check at /healthz

use agentflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Host, port and engine limits come from AGENTFLOW_* environment variables
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}

use statemux_core::ToolRegistry;
use statemux_http::{init_tracing, start_server, LogConfig, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing(&LogConfig::from_env());

    let config = ServerConfig::from_env();
    let tools = ToolRegistry::with_builtin_tools();
    info!("Registered tools: {}", tools.list().iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", "));

    let server = start_server(config, tools).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down server...");
    server.shutdown().await;
    info!("Server shutdown complete");

    Ok(())
}

use anyhow::Result;
use rmcp::ServiceExt;
use rmcp::transport::sse_server::SseServer;
use rmcp::transport::stdio;
use tracing_subscriber::{self, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DocsConfig;
use crate::mcp::DocExplorer;

// start sse server
pub async fn start_sse_server(addr: &str, config: DocsConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let explorer = DocExplorer::from_config(&config).await?;
    tracing::info!("Serving documentation from {} over SSE on {}", config.base_url, addr);

    let service = explorer.clone();
    let ct = SseServer::serve(addr.parse()?)
        .await?
        .with_service(move || service.clone());

    tokio::signal::ctrl_c().await?;
    ct.cancel();
    explorer.persist().await?;
    Ok(())
}

// start stdio server
pub async fn start_stdio_server(config: DocsConfig) -> Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting MCP server for {}", config.base_url);

    let explorer = DocExplorer::from_config(&config).await?;
    let service = explorer.clone().serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    service.waiting().await?;
    explorer.persist().await?;
    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use docs_explorer_mcp::config::DocsConfig;
use docs_explorer_mcp::server;

#[derive(Parser, Debug)]
#[command(version, about = "Documentation Explorer MCP Server")]
struct Cli {
    /// Type of server to run
    #[arg(short, long, value_enum, default_value_t = ServerType::Stdio)]
    server_type: ServerType,

    /// Address for the SSE server
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    address: String,

    /// JSON config file
    #[arg(short, long, env = "DOCS_EXPLORER_CONFIG")]
    config: Option<PathBuf>,

    /// Root URL of the documentation site
    #[arg(long, env = "DOCS_EXPLORER_BASE_URL")]
    base_url: Option<String>,

    /// Seconds a fetched page stays fresh
    #[arg(long, env = "DOCS_EXPLORER_CACHE_TTL")]
    cache_ttl: Option<u64>,

    /// Maximum number of cached pages
    #[arg(long, env = "DOCS_EXPLORER_CACHE_CAPACITY")]
    cache_capacity: Option<usize>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "DOCS_EXPLORER_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Directory to persist the cache to
    #[arg(long, env = "DOCS_EXPLORER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ServerType {
    /// Start an SSE server
    Sse,
    /// Start a stdio server
    Stdio,
}

impl Cli {
    fn into_config(self) -> Result<DocsConfig> {
        let mut config = match &self.config {
            Some(path) => DocsConfig::from_file(path)?,
            None => DocsConfig::default(),
        };
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache_ttl = Duration::from_secs(ttl);
        }
        if let Some(capacity) = self.cache_capacity {
            config.cache_capacity = capacity;
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout = Duration::from_secs(timeout);
        }
        if self.cache_dir.is_some() {
            config.cache_dir = self.cache_dir;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let server_type = cli.server_type;
    let address = cli.address.clone();
    let config = cli.into_config()?;

    match server_type {
        ServerType::Sse => {
            eprintln!("Starting SSE server on {}", address);
            server::start_sse_server(&address, config).await?;
        }
        ServerType::Stdio => {
            server::start_stdio_server(config).await?;
        }
    }

    Ok(())
}

use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use seq_mcp::alias::AliasResolver;
use seq_mcp::client::WorkspaceConnectionFactory;
use seq_mcp::config::{Config, ServerMode};
use seq_mcp::http::{serve_alongside, serve_http};
use seq_mcp::mcp::{run_stdio, McpServer};
use seq_mcp::tools::SeqTools;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout 承载 stdio 协议，日志只能写 stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match env::args().nth(1) {
        Some(path) => {
            let path = Path::new(&path);
            info!(config = %path.display(), "loading config");
            Config::load_from_path(path)
                .with_context(|| format!("failed to load config {}", path.display()))?
        }
        None => {
            info!("no config file given, using SEQ_SERVER_URL / SEQ_API_KEY");
            Config::from_env()
        }
    };

    let factory = WorkspaceConnectionFactory::new(&config.seq)
        .context("failed to create Seq clients")?;
    let aliases = AliasResolver::with_overrides(&config.aliases);
    info!(
        workspaces = ?factory.workspaces(),
        aliases = aliases.len(),
        mode = ?config.server.mode,
        "seq-mcp starting"
    );

    let tools = Arc::new(SeqTools::new(Arc::new(factory), Arc::new(aliases)));
    let server = Arc::new(McpServer::new(tools));

    match config.server.mode {
        ServerMode::Stdio => run_stdio(server).await?,
        ServerMode::Http => serve_http(&config.server, server).await?,
        ServerMode::Both => {
            serve_alongside(run_stdio(server.clone()), &config.server, server).await?
        }
    }

    Ok(())
}

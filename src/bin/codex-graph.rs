//! codex-graph HTTP server.
//!
//! Usage:
//!   codex-graph --config codex.toml --bind 0.0.0.0:5000

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use codex_graph::{server, Graph, GraphConfig, MemoryPersistence};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "codex-graph")]
#[command(author, version, about = "In-memory knowledge graph server", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', env = "CODEX_GRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address; overrides `server.bind`
    #[arg(long, short = 'b', env = "CODEX_GRAPH_BIND")]
    bind: Option<String>,

    /// Seed the U-Core ontology on startup
    #[arg(long)]
    seed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GraphConfig::load(path)?,
        None => GraphConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    config.seed.ucore |= cli.seed;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let bind = config.server.bind.clone();
    let graph = Arc::new(Graph::open(config, MemoryPersistence::new()).await?);
    let app = server::router(graph.clone());

    let listener = TcpListener::bind(&bind).await?;
    info!(addr = %listener.local_addr()?, "codex-graph listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    graph.shutdown().await?;
    info!("codex-graph stopped");
    Ok(())
}

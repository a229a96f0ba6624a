use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portfolio_rag::config::Config;
use portfolio_rag::embedder::{self, Embedder};
use portfolio_rag::pipeline::{PipelineBuilder, PipelineState};
use portfolio_rag::server::{self, AppState};

/// Portfolio RAG chatbot backend.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Address to bind, overriding `server.host`.
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on, overriding `server.port`.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Starting portfolio-rag v{}", env!("CARGO_PKG_VERSION"));

    // 1. Load config
    let mut config = Config::load(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host.to_string();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate().context("invalid configuration")?;

    let host: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("invalid server.host: {}", config.server.host))?;
    let addr = SocketAddr::new(host, config.server.port);
    let config = Arc::new(config);

    // 2. Build the pipeline once. The embedding model is loaded (and
    // downloaded on first run) by the first build that needs it.
    let model = config.model.clone();
    let builder = PipelineBuilder::with_loader(Arc::clone(&config), move || {
        let loaded: Arc<dyn Embedder> = Arc::new(embedder::load_local(&model)?);
        Ok(loaded)
    });
    let init = builder.clone();
    let state = tokio::task::spawn_blocking(move || init.initialize())
        .await
        .context("pipeline initialization task panicked")?;
    if let PipelineState::Ready(p) = &state {
        info!("Indexed {} chunks into {:?} index", p.chunk_count(), p.backend());
    }

    // 3. Serve
    server::serve(addr, AppState::new(builder, state)).await
}

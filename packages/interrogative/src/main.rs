use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use figment::providers::Serialized;
use interrogative::config::{self, FileConfig};
use interrogative::{Session, SessionConfig};
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "interrogative")]
#[command(about = "Live session backend: shared files, terminals and repository graph")]
struct Cli {
    /// Directory holding config.toml (defaults to the platform config dir)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the web server
    #[arg(short, long)]
    port: Option<u16>,

    /// Workspace root (defaults to the working directory)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "interrogative=debug,event_bus=debug,pty_manager=debug,tower_http=debug,info"
    } else {
        "interrogative=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config_dir = cli.config_dir.clone().unwrap_or_else(config::default_config_dir);
    let mut figment = config::load_config(&config_dir);
    if let Some(host) = &cli.host {
        figment = figment.merge(Serialized::default("server.host", host));
    }
    if let Some(port) = cli.port {
        figment = figment.merge(Serialized::default("server.port", port));
    }
    if let Some(home) = &cli.home {
        figment = figment.merge(Serialized::default("files.home", home));
    }
    let file_config: FileConfig = figment
        .extract()
        .with_context(|| format!("Invalid configuration in {}", config_dir.display()))?;
    let config = SessionConfig::from_file(&file_config)?;

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    let actual_addr = listener.local_addr()?;

    let session = Session::start(config).await;
    let app = session.router();

    info!("Interrogative listening on http://{}", actual_addr);
    info!("  WS  /ws/attach/main   - session events");
    info!("  WS  /ws/attach/shell  - terminal (?instance=&cols=&rows=)");
    info!("  GET /health, /metrics");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    session.shutdown().await;
    info!("Shutdown complete");
    server_result
}

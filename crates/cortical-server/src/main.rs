//! Cortical server
//!
//! Serves the hub over WebSocket with the echo cortex registered.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use cortical::{CortexRegistry, Hub};
use cortical_core::config::load_config;
use cortical_core::tracing_init::{default_filter, init_tracing};
use cortical_echo::EchoCortex;
use cortical_server::app::build_app;

#[derive(Parser, Debug)]
#[command(name = "cortical-server")]
#[command(version, about = "Cortical server - per-connection WebSocket dispatch hub")]
struct Args {
    /// Address to listen on (overrides the config file).
    #[arg(long, env = "CORTICAL_LISTEN_ADDR")]
    addr: Option<SocketAddr>,

    /// Path to a JSON config file.
    #[arg(long, env = "CORTICAL_CONFIG")]
    config: Option<PathBuf>,

    /// Directory served for every path other than the hub routes.
    #[arg(long, env = "CORTICAL_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Log level for workspace crates when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.listen_addr = addr;
    }
    if let Some(dir) = args.static_dir {
        config.server.static_dir = Some(dir);
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    config.validate()?;

    init_tracing(&default_filter(&config.server.log_level), args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.listen_addr,
        ws_path = %config.server.ws_path,
        "Starting cortical-server"
    );

    let registry = CortexRegistry::new().with(EchoCortex::pong());
    let hub = Hub::new(registry, config.hub.clone())?;
    let app = build_app(hub.clone(), &config.server);

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, draining sessions");
            hub.shutdown();
        })
        .await?;

    info!("Cortical server stopped");
    Ok(())
}

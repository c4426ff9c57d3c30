//! sessionware-server - Sessionware demo server
//!
//! REST API over TCP whose per-client state lives in the session middleware.

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod config;
mod routes;
mod state;

use cli::Args;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("sessionware_server=info".parse()?))
        .init();

    let args = Args::parse();

    info!("sessionware-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::Config::load(args.config.as_deref())?;
    config.apply_overrides(args.listen, args.keys);
    info!("Config loaded from {:?}", config.config_path);

    let state = AppState::from_config(config, args.dev_key)?;
    let listen = state.config.listen.clone();

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;
    info!(
        "Listening on {} (session key {:?}, store: {})",
        listener.local_addr()?,
        state.session_options.key,
        state.session_options.store().is_some()
    );

    axum::serve(listener, routes::create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
    }
}

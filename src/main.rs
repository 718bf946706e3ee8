mod command;
mod config;
mod health;
mod platform;
mod quote;
mod registrar;
mod supervisor;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,quotebot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Local runs keep secrets in .env; real env vars always win.
    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }

    // An explicit path must exist; the default one is optional.
    let config_path = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Some(path),
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };

    match &config_path {
        Some(path) => info!("Loading configuration from: {}", path.display()),
        None => info!("Loading configuration from environment"),
    }
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    info!("Configuration loaded successfully");
    info!("  API endpoint: {}", config.api.endpoint);
    info!("  API timeout: {}s", config.api.timeout_secs);
    info!("  Allowed roles: {:?}", config.access.allowed_role_ids);
    match config.discord.guild_id {
        Some(id) => info!("  Command scope: guild {}", id),
        None => info!("  Command scope: global"),
    }
    info!("  Port: {}", config.server.port);

    supervisor::run(Arc::new(config)).await?;

    info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}

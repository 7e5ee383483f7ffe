mod bootstrap;
mod health;
mod notify;
mod sweeper;

use std::time::Duration;

use anyhow::Result;
use opsgate_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use opsgate_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    // Now bootstrap using the same config we already loaded
    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    tracing::info!(
        event_name = "system.server.notification_mode",
        correlation_id = "bootstrap",
        mode = if app.config.notifications.enabled { "webhook" } else { "disabled" },
        "notification delivery mode initialized"
    );

    let sweeper = sweeper::spawn(
        app.service.clone(),
        Duration::from_secs(app.config.engine.sweep_interval_secs),
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "opsgate-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "opsgate-server stopping"
    );

    sweeper.stop(Duration::from_secs(app.config.server.graceful_shutdown_secs)).await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

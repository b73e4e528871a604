//! brokerd provisioner service.
//!
//! Connects to NATS, loads handles from the canonical store, tracks worker
//! nodes and serves the operational API until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use brokerd_bus::{NatsBus, NatsConfig};
use brokerd_provisioner::{service, Config};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // RUST_LOG wins over BROKER_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        service = %config.service_name,
        listen_addr = %config.listen_addr,
        nats_url = %config.nats_url,
        "Starting brokerd provisioner"
    );

    let bus = NatsBus::connect(&NatsConfig::new(config.nats_url.clone()))
        .await
        .context("failed to connect to NATS")?;
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server = tokio::spawn(service::serve(config, Arc::new(bus), listener, shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut server => {
            return match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Provisioner task panicked");
                    Err(e.into())
                }
            };
        }
    }

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server).await {
        Ok(Ok(outcome)) => outcome?,
        Ok(Err(e)) => error!(error = %e, "Provisioner task panicked"),
        Err(_) => warn!("Provisioner did not shut down in time"),
    }

    info!("Provisioner shutdown complete");
    Ok(())
}

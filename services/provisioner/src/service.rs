//! Wiring for a standalone provisioner process.

use std::sync::Arc;

use anyhow::{Context, Result};
use brokerd_bus::MessageBus;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::api;
use crate::config::Config;
use crate::error::BrokerResult;
use crate::handles::{HandleSource, HttpHandleSource, MemoryHandleSource};
use crate::provisioner::Provisioner;
use crate::workers;

/// The canonical handle store named by `config`, or an in-memory one.
pub fn handle_source(config: &Config) -> BrokerResult<Arc<dyn HandleSource>> {
    match &config.handle_store {
        Some(store) => {
            info!(url = %store.url, label = %store.label, "Using HTTP canonical handle store");
            Ok(Arc::new(HttpHandleSource::new(store)?))
        }
        None => {
            warn!("No canonical handle store configured, handles live in memory only");
            Ok(Arc::new(MemoryHandleSource::new()))
        }
    }
}

/// Run the provisioner on `bus` and serve the operational API on `listener`
/// until `shutdown` turns true. Workers are joined before returning.
pub async fn serve(
    config: Config,
    bus: Arc<dyn MessageBus>,
    listener: TcpListener,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    config.validate()?;
    let source = handle_source(&config)?;
    let provisioner = Provisioner::new(config, bus, source);
    let handles = workers::spawn_workers(&provisioner, shutdown.clone())
        .await
        .context("failed to start provisioner workers")?;

    let app = api::create_router(provisioner);
    info!(addr = %listener.local_addr()?, "Operational API listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await;
    info!("Operational API stopped");

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task failed");
        }
    }
    served.context("operational API failed")
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

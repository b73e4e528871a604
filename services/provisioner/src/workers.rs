//! Background workers driven by the bus and by timers.
//!
//! Listeners subscribe when they are created, so nothing published after
//! [`spawn_workers`] returns is missed.

use std::time::Duration;

use brokerd_bus::Subscription;
use brokerd_messages::decode;
use brokerd_messages::types::{Announcement, NodeHandlesReport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::provisioner::Provisioner;

/// Feeds node announcements into the registry.
pub struct AnnouncementListener {
    provisioner: Provisioner,
    subscription: Subscription,
}

impl AnnouncementListener {
    pub async fn start(provisioner: Provisioner) -> BrokerResult<Self> {
        let subscription = provisioner
            .bus()
            .subscribe(&provisioner.subjects().announce())
            .await?;
        Ok(Self {
            provisioner,
            subscription,
        })
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(subject = %self.subscription.subject(), "Starting announcement listener");

        loop {
            tokio::select! {
                msg = self.subscription.next() => {
                    let Some(envelope) = msg else { break };
                    match decode::<Announcement>(&envelope.payload) {
                        Ok(announcement) => {
                            let node_id = announcement.id.clone();
                            let outcome = self.provisioner.record_announcement(announcement);
                            debug!(node_id = %node_id, ?outcome, "Announcement recorded");
                        }
                        Err(e) => warn!(error = %e, "Dropping malformed announcement"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Announcement listener shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Feeds `node_handles` reports into the running orphan sweep.
pub struct NodeHandlesListener {
    provisioner: Provisioner,
    subscription: Subscription,
}

impl NodeHandlesListener {
    pub async fn start(provisioner: Provisioner) -> BrokerResult<Self> {
        let subscription = provisioner
            .bus()
            .subscribe(&provisioner.subjects().node_handles())
            .await?;
        Ok(Self {
            provisioner,
            subscription,
        })
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                msg = self.subscription.next() => {
                    let Some(envelope) = msg else { break };
                    match decode::<NodeHandlesReport>(&envelope.payload) {
                        Ok(report) => self.provisioner.stage_node_report(report),
                        Err(e) => warn!(error = %e, "Dropping malformed handle report"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Periodically drops nodes that stopped announcing.
pub struct NodePruner {
    provisioner: Provisioner,
    interval: Duration,
}

impl NodePruner {
    pub fn new(provisioner: Provisioner) -> Self {
        let interval = provisioner.config().prune_interval;
        Self {
            provisioner,
            interval,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting node pruner");

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = self.provisioner.prune_nodes();
                    if !removed.is_empty() {
                        info!(removed = removed.len(), "Pruned stale nodes");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Node pruner shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Runs a full orphan sweep every `interval`.
pub struct OrphanSweeper {
    provisioner: Provisioner,
    interval: Duration,
}

impl OrphanSweeper {
    pub fn new(provisioner: Provisioner, interval: Duration) -> Self {
        Self {
            provisioner,
            interval,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            confirm_delay_secs = self.provisioner.config().orphan_confirm_delay.as_secs(),
            "Starting orphan sweeper"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tokio::select! {
                        result = self.provisioner.sweep_orphans() => {
                            if let Err(e) = result {
                                error!(error = %e, "Orphan sweep failed");
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Orphan sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Load handles, start every worker, then ask nodes to announce.
///
/// A failing handle load is logged and the provisioner starts empty; the
/// next refresh or sweep retries it. A config with a zero period is refused
/// before anything is spawned.
pub async fn spawn_workers(
    provisioner: &Provisioner,
    shutdown: watch::Receiver<bool>,
) -> BrokerResult<Vec<JoinHandle<()>>> {
    provisioner
        .config()
        .validate()
        .map_err(|e| BrokerError::internal(format!("invalid config: {e}")))?;

    if let Err(e) = provisioner.refresh_handles().await {
        error!(error = %e, "Initial handle load failed");
    }

    let announcements = AnnouncementListener::start(provisioner.clone()).await?;
    let reports = NodeHandlesListener::start(provisioner.clone()).await?;
    let pruner = NodePruner::new(provisioner.clone());

    let mut handles = vec![
        tokio::spawn(announcements.run(shutdown.clone())),
        tokio::spawn(reports.run(shutdown.clone())),
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move { pruner.run(shutdown).await }
        }),
    ];

    if let Some(interval) = provisioner.config().orphan_check_interval {
        let sweeper = OrphanSweeper::new(provisioner.clone(), interval);
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move { sweeper.run(shutdown).await }));
    }

    provisioner.discover().await?;
    info!(workers = handles.len(), "Provisioner workers started");
    Ok(handles)
}

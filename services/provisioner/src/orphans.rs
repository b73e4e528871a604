//! Two-phase orphan sweep.
//!
//! Phase one snapshots the canonical handles, broadcasts `check_orphan` and
//! stages each node's surplus as its report arrives. Phase two, after
//! `orphan_confirm_delay`, snapshots again and keeps only candidates that are
//! still unknown. Confirmed orphans are served on the ops API and purged on
//! request, one payload-bounded batch at a time.

use brokerd_id::SweepId;
use brokerd_messages::types::{CheckOrphanRequest, NodeHandlesReport};
use brokerd_reconcile::{purge_batches, ExpectedIndex, OrphanSet, OrphanStaging};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::provisioner::Provisioner;

struct ActiveSweep {
    id: SweepId,
    started_at: DateTime<Utc>,
    expected: ExpectedIndex,
    staging: OrphanStaging,
}

/// Outcome of the last completed sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepRecord {
    pub id: SweepId,
    pub started_at: DateTime<Utc>,
    pub confirmed_at: DateTime<Utc>,
    pub reported_nodes: usize,
    pub instances: usize,
    pub bindings: usize,
}

#[derive(Default)]
pub(crate) struct OrphanState {
    sweep: Option<ActiveSweep>,
    confirmed: OrphanSet,
    last_sweep: Option<SweepRecord>,
}

impl OrphanState {
    pub(crate) fn confirmed(&self) -> &OrphanSet {
        &self.confirmed
    }

    pub(crate) fn last_sweep(&self) -> Option<&SweepRecord> {
        self.last_sweep.as_ref()
    }
}

/// Confirmed orphans plus sweep status, served on `/orphans`.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<SweepId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sweep: Option<SweepRecord>,
    pub instance_count: usize,
    pub binding_count: usize,
    pub orphans: OrphanSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeSummary {
    pub nodes: Vec<String>,
    pub batches: usize,
    pub instances: usize,
    pub bindings: usize,
}

impl Provisioner {
    /// Phase one: snapshot the canonical handles and ask every node to report.
    ///
    /// Starting a sweep discards one still in progress.
    #[instrument(skip(self))]
    pub async fn check_orphans(&self) -> BrokerResult<SweepId> {
        self.refresh_handles().await?;
        let expected = ExpectedIndex::from_handles(self.handles().lock().all());

        let id = SweepId::new();
        let replaced = self.orphan_state().lock().sweep.replace(ActiveSweep {
            id,
            started_at: Utc::now(),
            expected,
            staging: OrphanStaging::new(),
        });
        if let Some(old) = replaced {
            warn!(superseded = %old.id, "Orphan sweep superseded before confirmation");
        }

        self.router()
            .publish(&self.subjects().check_orphan(), &CheckOrphanRequest::default())
            .await?;
        info!(sweep_id = %id, "Orphan check broadcast");
        Ok(id)
    }

    /// Stage one node's report against the snapshot of the sweep in progress.
    pub fn stage_node_report(&self, report: NodeHandlesReport) {
        let mut state = self.orphan_state().lock();
        let Some(sweep) = state.sweep.as_mut() else {
            debug!(node_id = %report.node_id, "No sweep in progress, ignoring handle report");
            return;
        };
        let counts = sweep.staging.stage(&report, &sweep.expected);
        debug!(
            sweep_id = %sweep.id,
            node_id = %report.node_id,
            instances = counts.instances,
            bindings = counts.bindings,
            "Staged orphan candidates"
        );
    }

    /// Phase two: re-snapshot and keep only candidates still unknown.
    /// Replaces the confirmed set.
    #[instrument(skip(self))]
    pub async fn confirm_orphans(&self, sweep_id: SweepId) -> BrokerResult<OrphanReport> {
        self.refresh_handles().await?;
        let expected = ExpectedIndex::from_handles(self.handles().lock().all());

        {
            let mut state = self.orphan_state().lock();
            let sweep = match state.sweep.take() {
                Some(sweep) if sweep.id == sweep_id => sweep,
                other => {
                    state.sweep = other;
                    return Err(BrokerError::NotFound(format!("sweep {sweep_id}")));
                }
            };

            let confirmed = sweep.staging.confirm(&expected);
            let record = SweepRecord {
                id: sweep.id,
                started_at: sweep.started_at,
                confirmed_at: Utc::now(),
                reported_nodes: sweep.staging.reported_nodes(),
                instances: confirmed.instance_count(),
                bindings: confirmed.binding_count(),
            };
            info!(
                sweep_id = %record.id,
                reported_nodes = record.reported_nodes,
                instances = record.instances,
                bindings = record.bindings,
                "Orphans confirmed"
            );
            for (node, ids) in &confirmed.instances {
                info!(node_id = %node, instances = ?ids, "Orphan instances");
            }
            state.confirmed = confirmed;
            state.last_sweep = Some(record);
        }

        Ok(self.orphans())
    }

    /// Both phases, separated by `orphan_confirm_delay`.
    pub async fn sweep_orphans(&self) -> BrokerResult<OrphanReport> {
        let sweep_id = self.check_orphans().await?;
        tokio::time::sleep(self.config().orphan_confirm_delay).await;
        self.confirm_orphans(sweep_id).await
    }

    /// Confirm `sweep_id` in the background once the delay has passed.
    pub fn schedule_confirmation(&self, sweep_id: SweepId) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.config().orphan_confirm_delay).await;
            if let Err(e) = this.confirm_orphans(sweep_id).await {
                error!(sweep_id = %sweep_id, error = %e, "Orphan confirmation failed");
            }
        })
    }

    pub fn orphans(&self) -> OrphanReport {
        let state = self.orphan_state().lock();
        OrphanReport {
            in_progress: state.sweep.as_ref().map(|s| s.id),
            last_sweep: state.last_sweep.clone(),
            instance_count: state.confirmed.instance_count(),
            binding_count: state.confirmed.binding_count(),
            orphans: state.confirmed.clone(),
        }
    }

    /// Send purge requests for `selection`, or for every confirmed orphan.
    ///
    /// Each node's entries are split into batches under
    /// `max_payload_bytes`; one purge message goes out per batch. Purged
    /// entries leave the confirmed set.
    #[instrument(skip(self, selection))]
    pub async fn purge_orphans(&self, selection: Option<OrphanSet>) -> BrokerResult<PurgeSummary> {
        let target = match selection {
            Some(set) => set,
            None => self.orphan_state().lock().confirmed.clone(),
        };

        let mut summary = PurgeSummary::default();
        for node in target.nodes() {
            let instances = target.instances.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            let bindings = target.bindings.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            let batches = purge_batches(instances, bindings, self.config().max_payload_bytes)
                .map_err(|e| BrokerError::internal(e.to_string()))?;

            for batch in &batches {
                self.router()
                    .publish(&self.subjects().purge_orphan(&node), batch)
                    .await?;
                self.orphan_state()
                    .lock()
                    .confirmed
                    .remove_purged(&node, batch);
                summary.instances += batch.orphan_ins_list.len();
                summary.bindings += batch.orphan_binding_list.len();
            }

            info!(
                node_id = %node,
                batches = batches.len(),
                instances = instances.len(),
                bindings = bindings.len(),
                "Purge sent"
            );
            summary.batches += batches.len();
            summary.nodes.push(node);
        }
        Ok(summary)
    }
}

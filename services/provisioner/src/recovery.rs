//! Rebuilding an instance after its node was lost.
//!
//! Steps run in order: re-provision with the old credentials, persist the new
//! instance handle, restore data, then rebind every known binding in
//! parallel. Any failure fails the whole recovery. Nothing is rolled back.

use brokerd_messages::ServiceHandle;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::provisioner::Provisioner;

/// Result of a successful recovery.
#[derive(Debug, Clone)]
pub struct RecoveredInstance {
    pub instance: ServiceHandle,
    pub bindings: Vec<ServiceHandle>,
}

impl Provisioner {
    /// Recover `instance_id` from `backup_path`.
    #[instrument(skip(self))]
    pub async fn recover(
        &self,
        instance_id: &str,
        backup_path: &str,
    ) -> BrokerResult<RecoveredInstance> {
        let (instance, bindings) = {
            let handles = self.handles().lock();
            let instance = handles
                .instance(instance_id)
                .cloned()
                .ok_or_else(|| BrokerError::NotFound(instance_id.to_string()))?;
            (instance, handles.bindings_of(instance_id))
        };
        let plan = instance
            .plan()
            .ok_or_else(|| BrokerError::internal(format!("instance {instance_id} has no plan")))?
            .to_string();
        let version = instance.version().map(str::to_owned);

        let recovered = self
            .provision(&plan, version.as_deref(), Some(instance.credentials.clone()))
            .await
            .map_err(|e| step_failed(instance_id, "provision", e))?;

        self.source()
            .update_handle(&recovered)
            .await
            .map_err(|e| step_failed(instance_id, "update instance handle", e.into()))?;

        self.restore(&recovered.service_id, backup_path)
            .await
            .map_err(|e| step_failed(instance_id, "restore", e))?;

        let rebound = self.rebind_all(instance_id, bindings).await?;

        info!(
            node_id = recovered.node_id().unwrap_or_default(),
            bindings = rebound.len(),
            "Instance recovered"
        );
        Ok(RecoveredInstance {
            instance: recovered,
            bindings: rebound,
        })
    }

    /// Fan out one rebind per binding and wait for all of them, bounded by
    /// `recovery_bind_timeout`.
    async fn rebind_all(
        &self,
        instance_id: &str,
        bindings: Vec<ServiceHandle>,
    ) -> BrokerResult<Vec<ServiceHandle>> {
        let expected = bindings.len();
        let mut tasks = JoinSet::new();
        for binding in bindings {
            let this = self.clone();
            tasks.spawn(async move {
                let handle = this.rebind(&binding).await?;
                this.source().update_handle(&handle).await?;
                Ok::<_, BrokerError>(handle)
            });
        }

        let barrier = async {
            let mut rebound = Vec::with_capacity(expected);
            let mut failed = 0usize;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(handle)) => rebound.push(handle),
                    Ok(Err(e)) => {
                        warn!(error = %e, "Rebind failed");
                        failed += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "Rebind task panicked");
                        failed += 1;
                    }
                }
            }
            (rebound, failed)
        };

        let timeout = self.config().recovery_bind_timeout;
        let (rebound, failed) = tokio::time::timeout(timeout, barrier).await.map_err(|_| {
            step_failed(
                instance_id,
                "rebind",
                BrokerError::internal(format!("bindings not rebound within {timeout:?}")),
            )
        })?;

        if failed > 0 || rebound.len() != expected {
            return Err(step_failed(
                instance_id,
                "rebind",
                BrokerError::internal(format!("{} of {expected} bindings rebound", rebound.len())),
            ));
        }
        Ok(rebound)
    }
}

fn step_failed(instance_id: &str, step: &str, cause: BrokerError) -> BrokerError {
    error!(instance_id, step, error = %cause, "Recovery failed");
    BrokerError::internal(format!("recovery of {instance_id} failed at {step}"))
}

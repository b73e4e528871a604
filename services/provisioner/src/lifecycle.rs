//! Instance lifecycle: provision, bind, unbind, unprovision, restore, migrate.
//!
//! Every operation that talks to a node is one router call. Node failures
//! come back as [`BrokerError::Node`] with the node's payload untouched.

use std::fmt;
use std::str::FromStr;

use brokerd_id::BindingId;
use brokerd_messages::types::{
    BindRequest, BindResponse, MigrationRequest, ProvisionRequest, ProvisionResponse,
    RestoreRequest, SimpleResponse, UnbindRequest, UnprovisionRequest, UpdateInstanceResponse,
};
use brokerd_messages::{Credentials, ServiceHandle};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::provisioner::Provisioner;
use crate::selector;

/// Actions accepted by [`Provisioner::migrate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationAction {
    Disable,
    Enable,
    Import,
    Update,
    CleanupNfs,
    Unprovision,
    Check,
}

impl MigrationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Enable => "enable",
            Self::Import => "import",
            Self::Update => "update",
            Self::CleanupNfs => "cleanupnfs",
            Self::Unprovision => "unprovision",
            Self::Check => "check",
        }
    }
}

impl fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationAction {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "enable" => Ok(Self::Enable),
            "import" => Ok(Self::Import),
            "update" => Ok(Self::Update),
            "cleanupnfs" => Ok(Self::CleanupNfs),
            "unprovision" => Ok(Self::Unprovision),
            "check" => Ok(Self::Check),
            other => Err(BrokerError::MalformattedRequest(format!(
                "unknown migration action {other}"
            ))),
        }
    }
}

fn node_of(handle: &ServiceHandle) -> BrokerResult<String> {
    handle
        .node_id()
        .map(str::to_owned)
        .ok_or_else(|| BrokerError::internal(format!("handle {} has no node_id", handle.service_id)))
}

impl Provisioner {
    /// Provision a new instance on the best node for `plan`.
    ///
    /// Passing `credentials` asks the node to reuse an existing identity.
    #[instrument(skip(self, credentials))]
    pub async fn provision(
        &self,
        plan: &str,
        version: Option<&str>,
        credentials: Option<Credentials>,
    ) -> BrokerResult<ServiceHandle> {
        let over_provision = self.config().allows_over_provisioning(plan);
        let reservation = selector::reserve(self.registry(), plan, version, over_provision)?;
        let node_id = reservation.node_id().to_string();

        let request = ProvisionRequest {
            plan: plan.to_string(),
            credentials,
            version: version.map(str::to_owned),
        };
        let reply: ProvisionResponse = self
            .router()
            .call(&self.subjects().provision(&node_id), &request)
            .await?;
        drop(reservation);

        let mut credentials = reply
            .credentials
            .ok_or_else(|| BrokerError::internal("provision reply without credentials"))?;
        if credentials.node_id().is_none() {
            credentials.insert("node_id", node_id.clone());
        }
        let service_id = credentials
            .name()
            .ok_or_else(|| BrokerError::internal("provision reply without instance name"))?
            .to_string();

        let handle = ServiceHandle {
            service_id,
            configuration: json!({ "plan": plan, "version": version }),
            credentials,
        };
        self.handles().lock().upsert(handle.clone());
        info!(instance_id = %handle.service_id, node_id = %node_id, "Instance provisioned");
        Ok(handle)
    }

    /// Bind to an instance. Passing `credentials` asks the node to reuse an
    /// existing binding identity.
    pub async fn bind(
        &self,
        instance_id: &str,
        bind_opts: Value,
        credentials: Option<Credentials>,
    ) -> BrokerResult<ServiceHandle> {
        self.bind_as(instance_id, bind_opts, credentials, None).await
    }

    /// Re-create a known binding on its instance's current node, keeping its
    /// `service_id` and original options.
    pub async fn rebind(&self, existing: &ServiceHandle) -> BrokerResult<ServiceHandle> {
        let instance_id = existing
            .instance_name()
            .ok_or_else(|| BrokerError::internal("binding without instance name"))?;
        let bind_opts = existing.binding_options().cloned().unwrap_or(Value::Null);
        self.bind_as(
            instance_id,
            bind_opts,
            Some(existing.credentials.clone()),
            Some(existing.service_id.clone()),
        )
        .await
    }

    #[instrument(skip(self, bind_opts, credentials, service_id))]
    async fn bind_as(
        &self,
        instance_id: &str,
        bind_opts: Value,
        credentials: Option<Credentials>,
        service_id: Option<String>,
    ) -> BrokerResult<ServiceHandle> {
        let instance = self
            .handles()
            .lock()
            .instance(instance_id)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(instance_id.to_string()))?;
        let node_id = node_of(&instance)?;

        let request = BindRequest {
            name: instance.instance_name().unwrap_or(instance_id).to_string(),
            bind_opts: bind_opts.clone(),
            credentials,
        };
        let reply: BindResponse = self
            .router()
            .call(&self.subjects().bind(&node_id), &request)
            .await?;

        let mut credentials = reply
            .credentials
            .ok_or_else(|| BrokerError::internal("bind reply without credentials"))?;
        if credentials.node_id().is_none() {
            credentials.insert("node_id", node_id.clone());
        }

        let handle = ServiceHandle {
            service_id: service_id.unwrap_or_else(|| BindingId::new().to_string()),
            configuration: json!({
                "plan": instance.plan(),
                "version": instance.version(),
                "data": { "binding_options": bind_opts },
            }),
            credentials,
        };
        self.handles().lock().upsert(handle.clone());
        info!(binding_id = %handle.service_id, node_id = %node_id, "Binding created");
        Ok(handle)
    }

    #[instrument(skip(self))]
    pub async fn unbind(&self, binding_id: &str) -> BrokerResult<()> {
        let binding = self
            .handles()
            .lock()
            .binding(binding_id)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(binding_id.to_string()))?;
        let node_id = node_of(&binding)?;

        let request = UnbindRequest {
            credentials: binding.credentials,
        };
        let _: SimpleResponse = self
            .router()
            .call(&self.subjects().unbind(&node_id), &request)
            .await?;

        self.handles().lock().remove(binding_id);
        info!(node_id = %node_id, "Binding removed");
        Ok(())
    }

    /// Remove an instance and drop every binding on it.
    #[instrument(skip(self))]
    pub async fn unprovision(&self, instance_id: &str) -> BrokerResult<()> {
        let (instance, bindings) = {
            let handles = self.handles().lock();
            let instance = handles
                .instance(instance_id)
                .cloned()
                .ok_or_else(|| BrokerError::NotFound(instance_id.to_string()))?;
            let bindings = handles.bindings_of(instance_id);
            (instance, bindings)
        };
        let node_id = node_of(&instance)?;

        let request = UnprovisionRequest {
            name: instance.instance_name().unwrap_or(instance_id).to_string(),
            bindings: bindings.into_iter().map(|b| b.credentials).collect(),
        };
        let _: SimpleResponse = self
            .router()
            .call(&self.subjects().unprovision(&node_id), &request)
            .await?;

        let removed = self.handles().lock().remove_instance(instance_id);
        info!(node_id = %node_id, removed, "Instance unprovisioned");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, instance_id: &str, backup_path: &str) -> BrokerResult<()> {
        let instance = self
            .handles()
            .lock()
            .instance(instance_id)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(instance_id.to_string()))?;
        let node_id = node_of(&instance)?;

        let request = RestoreRequest {
            instance_id: instance_id.to_string(),
            backup_path: backup_path.to_string(),
        };
        let _: SimpleResponse = self
            .router()
            .call(&self.subjects().restore(&node_id), &request)
            .await?;
        info!(node_id = %node_id, "Instance restored");
        Ok(())
    }

    /// Run one migration step for an instance on `node_id`.
    ///
    /// Returns the rewritten handles for `update`, nothing otherwise.
    #[instrument(skip(self))]
    pub async fn migrate(
        &self,
        node_id: &str,
        instance_id: &str,
        action: &str,
    ) -> BrokerResult<Vec<ServiceHandle>> {
        let action: MigrationAction = action.parse()?;

        let (instance, bindings) = {
            let handles = self.handles().lock();
            let instance = handles
                .instance(instance_id)
                .cloned()
                .ok_or_else(|| BrokerError::NotFound(instance_id.to_string()))?;
            (instance, handles.bindings_of(instance_id))
        };

        match action {
            MigrationAction::Check => {
                let actual = node_of(&instance)?;
                if actual != node_id {
                    warn!(expected = %node_id, actual = %actual, "Instance on unexpected node");
                    return Err(BrokerError::internal(format!(
                        "instance {instance_id} is on node {actual}, not {node_id}"
                    )));
                }
                Ok(Vec::new())
            }
            MigrationAction::Unprovision => {
                self.unprovision(instance_id).await?;
                Ok(Vec::new())
            }
            MigrationAction::Update => {
                let request = MigrationRequest {
                    instance: instance.credentials,
                    bindings: bindings.into_iter().map(|b| b.credentials).collect(),
                };
                let reply: UpdateInstanceResponse = self
                    .router()
                    .call(&self.subjects().migration(action.as_str(), node_id), &request)
                    .await?;

                for handle in &reply.handles {
                    self.source().update_handle(handle).await?;
                    self.handles().lock().upsert(handle.clone());
                }
                info!(updated = reply.handles.len(), "Instance handles updated");
                Ok(reply.handles)
            }
            MigrationAction::Disable
            | MigrationAction::Enable
            | MigrationAction::Import
            | MigrationAction::CleanupNfs => {
                let request = MigrationRequest {
                    instance: instance.credentials,
                    bindings: bindings.into_iter().map(|b| b.credentials).collect(),
                };
                let _: SimpleResponse = self
                    .router()
                    .call(&self.subjects().migration(action.as_str(), node_id), &request)
                    .await?;
                info!("Migration step done");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("disable", MigrationAction::Disable)]
    #[case("cleanupnfs", MigrationAction::CleanupNfs)]
    #[case("update", MigrationAction::Update)]
    #[case("check", MigrationAction::Check)]
    fn test_action_roundtrip(#[case] raw: &str, #[case] action: MigrationAction) {
        let parsed: MigrationAction = raw.parse().unwrap();
        assert_eq!(parsed, action);
        assert_eq!(parsed.as_str(), raw);
    }

    #[test]
    fn test_unknown_action_is_malformatted() {
        let err = "explode".parse::<MigrationAction>().unwrap_err();
        assert_eq!(err.to_response().msg.code, 30001);
    }
}

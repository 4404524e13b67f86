use async_trait::async_trait;
use azure_api::extensions::ClusterContext;
use azure_api::internal::decode;
use azure_api::ControlPlane;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::{Error, Result};

/// Lifecycle operations of a ControlPlane resource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneActuator: Send + Sync {
    async fn reconcile(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()>;
    async fn delete(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()>;
    /// Delete without waiting for anything to clean up gracefully
    async fn force_delete(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()>;
    async fn migrate(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()>;
    async fn restore(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()>;
}

/// Checks the provider configs a ControlPlane carries. Rendering the control
/// plane components is left to the chart deployer of the host.
#[derive(Clone, Debug, Default)]
pub struct ProviderConfigActuator;

impl ProviderConfigActuator {
    fn check(&self, cp: &ControlPlane) -> Result<()> {
        let config = decode::control_plane_config(cp.spec.provider_config.as_ref())?;
        debug!(
            control_plane = ?cp.metadata.name,
            storage_class = ?config.storage.as_ref().and_then(|s| s.managed_default_storage_class),
            "Decoded control plane config"
        );

        // The exposure control plane carries no infrastructure status
        if cp.spec.purpose.as_deref() == Some("exposure") {
            return Ok(());
        }
        let raw = cp
            .spec
            .infrastructure_provider_status
            .as_ref()
            .ok_or_else(|| Error::configuration("control plane has no infrastructure provider status"))?;
        let status = decode::infrastructure_status(raw)?;
        if status.node_subnets().next().is_none() {
            return Err(Error::configuration("infrastructure status has no nodes subnet"));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneActuator for ProviderConfigActuator {
    async fn reconcile(&self, cp: &ControlPlane, _cluster: &ClusterContext) -> Result<()> {
        self.check(cp)?;
        info!(control_plane = ?cp.metadata.name, "Reconciled control plane");
        Ok(())
    }

    async fn delete(&self, cp: &ControlPlane, _cluster: &ClusterContext) -> Result<()> {
        info!(control_plane = ?cp.metadata.name, "Deleted control plane");
        Ok(())
    }

    async fn force_delete(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()> {
        self.delete(cp, cluster).await
    }

    async fn migrate(&self, cp: &ControlPlane, _cluster: &ClusterContext) -> Result<()> {
        info!(control_plane = ?cp.metadata.name, "Migrated control plane");
        Ok(())
    }

    async fn restore(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()> {
        self.reconcile(cp, cluster).await
    }
}

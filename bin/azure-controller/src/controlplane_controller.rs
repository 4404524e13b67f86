//! ControlPlane controller running the remedy cleanup around the provider checks

use std::sync::Arc;

use azure_api::extensions::EXTENSION_TYPE;
use azure_api::ControlPlane;
use azure_core::controlplane::{
    ControlPlaneActuator, KubeRemedyClient, KubeShootClientFactory, ProviderConfigActuator, RemedyPurgingActuator,
};
use azure_core::{ControllerConfig, ControllerMetrics};
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerRunConfig};
use kube_runtime::watcher::Config;
use kube_runtime::Controller;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::operation::{self, Operation, ReconcileError};

pub struct ControlPlaneController {
    client: Client,
    actuator: RemedyPurgingActuator<ProviderConfigActuator>,
    metrics: ControllerMetrics,
    concurrency: u16,
    shutdown: CancellationToken,
}

impl ControlPlaneController {
    pub fn new(
        client: Client,
        config: &ControllerConfig,
        metrics: ControllerMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        let actuator = RemedyPurgingActuator::new(
            ProviderConfigActuator,
            Arc::new(KubeRemedyClient::new(client.clone())),
            Arc::new(KubeShootClientFactory::new(client.clone())),
            config,
        );
        Self {
            client,
            actuator,
            metrics,
            concurrency: u16::try_from(config.concurrent_syncs).unwrap_or(u16::MAX),
            shutdown,
        }
    }

    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!("Starting ControlPlane reconciliation");

        let control_planes: Api<ControlPlane> = Api::all(self.client.clone());
        let shutdown = self.shutdown.clone();

        Controller::new(control_planes, Config::default())
            .with_config(ControllerRunConfig::default().concurrency(self.concurrency))
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(
                |cp, ctx| async move { ctx.reconcile(cp).await },
                |cp, e: &ReconcileError, _ctx| {
                    error!(control_plane = %cp.name_any(), error = %e, "Error reconciling ControlPlane");
                    operation::error_policy(e)
                },
                self.clone(),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _)) => debug!(control_plane = %obj.name, "Reconciled ControlPlane"),
                    Err(e) => debug!(error = %e, "ControlPlane reconciliation stream error"),
                }
            })
            .await;

        Ok(())
    }

    async fn reconcile(&self, cp: Arc<ControlPlane>) -> Result<Action, ReconcileError> {
        if cp.spec.type_ != EXTENSION_TYPE {
            return Ok(Action::await_change());
        }
        let namespace = cp
            .namespace()
            .ok_or_else(|| ReconcileError::MissingNamespace(cp.name_any()))?;
        let api: Api<ControlPlane> = Api::namespaced(self.client.clone(), &namespace);
        let cluster = operation::cluster(&self.client, &namespace).await?;

        let last = cp.status.as_ref().and_then(|s| s.last_operation.as_ref());
        let op = Operation::detect(&cp.metadata, &cluster);
        let type_ = op.last_operation_type(last);
        info!(control_plane = %format!("{}/{}", namespace, cp.name_any()), operation = ?op, "Reconciling ControlPlane");

        match op {
            Operation::Delete | Operation::ForceDelete => {
                if !operation::migrated(last) {
                    let result = if op == Operation::ForceDelete {
                        self.actuator.force_delete(&cp, &cluster).await
                    } else {
                        self.actuator.delete(&cp, &cluster).await
                    };
                    operation::record(&api, cp.as_ref(), &self.metrics, type_, result).await?;
                }
                operation::remove_finalizer(&api, cp.as_ref()).await?;
            }
            Operation::Migrate => {
                let result = self.actuator.migrate(&cp, &cluster).await;
                operation::record(&api, cp.as_ref(), &self.metrics, type_, result).await?;
                operation::clear_operation_annotation(&api, cp.as_ref()).await?;
            }
            Operation::Restore | Operation::Reconcile => {
                operation::ensure_finalizer(&api, cp.as_ref()).await?;
                let result = if op == Operation::Restore {
                    self.actuator.restore(&cp, &cluster).await
                } else {
                    self.actuator.reconcile(&cp, &cluster).await
                };
                operation::record(&api, cp.as_ref(), &self.metrics, type_, result).await?;
                operation::clear_operation_annotation(&api, cp.as_ref()).await?;
            }
        }
        Ok(Action::await_change())
    }
}

//! Infrastructure controller for reconciling Azure Infrastructure resources

use std::sync::Arc;

use azure_api::extensions::EXTENSION_TYPE;
use azure_api::Infrastructure;
use azure_client::ArmFactoryProvider;
use azure_core::infrastructure::{ActuatorOptions, InfrastructureActuator, KubeInfrastructureClient};
use azure_core::{ControllerConfig, ControllerMetrics};
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerRunConfig};
use kube_runtime::watcher::Config;
use kube_runtime::Controller;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::operation::{self, Operation, ReconcileError};

pub struct InfrastructureController {
    client: Client,
    actuator: InfrastructureActuator,
    metrics: ControllerMetrics,
    concurrency: u16,
    shutdown: CancellationToken,
}

impl InfrastructureController {
    pub fn new(
        client: Client,
        config: &ControllerConfig,
        metrics: ControllerMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        let actuator = InfrastructureActuator::new(
            Arc::new(KubeInfrastructureClient::new(client.clone())),
            Arc::new(ArmFactoryProvider::default()),
            ActuatorOptions {
                metrics: Some(metrics.clone()),
                ..ActuatorOptions::from(config)
            },
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
        info!("Starting Infrastructure reconciliation");

        let infrastructures: Api<Infrastructure> = Api::all(self.client.clone());
        let shutdown = self.shutdown.clone();

        Controller::new(infrastructures, Config::default())
            .with_config(ControllerRunConfig::default().concurrency(self.concurrency))
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(
                |infra, ctx| async move { ctx.reconcile(infra).await },
                |infra, e: &ReconcileError, _ctx| {
                    error!(infrastructure = %infra.name_any(), error = %e, "Error reconciling Infrastructure");
                    operation::error_policy(e)
                },
                self.clone(),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _)) => debug!(infrastructure = %obj.name, "Reconciled Infrastructure"),
                    Err(e) => debug!(error = %e, "Infrastructure reconciliation stream error"),
                }
            })
            .await;

        Ok(())
    }

    async fn reconcile(&self, infra: Arc<Infrastructure>) -> Result<Action, ReconcileError> {
        if infra.spec.type_ != EXTENSION_TYPE {
            return Ok(Action::await_change());
        }
        let namespace = infra
            .namespace()
            .ok_or_else(|| ReconcileError::MissingNamespace(infra.name_any()))?;
        let api: Api<Infrastructure> = Api::namespaced(self.client.clone(), &namespace);
        let cluster = operation::cluster(&self.client, &namespace).await?;

        let last = infra.status.as_ref().and_then(|s| s.last_operation.as_ref());
        let op = Operation::detect(&infra.metadata, &cluster);
        let type_ = op.last_operation_type(last);
        info!(infrastructure = %format!("{}/{}", namespace, infra.name_any()), operation = ?op, "Reconciling Infrastructure");

        let cancel = self.shutdown.child_token();
        match op {
            Operation::Delete | Operation::ForceDelete => {
                if operation::migrated(last) {
                    debug!(infrastructure = %infra.name_any(), "Migrated away, keeping Azure resources");
                } else {
                    let result = self.actuator.delete(&infra, &cluster, cancel).await;
                    operation::record(&api, infra.as_ref(), &self.metrics, type_, result).await?;
                }
                operation::remove_finalizer(&api, infra.as_ref()).await?;
                Ok(Action::await_change())
            }
            Operation::Migrate => {
                let result = self.actuator.migrate(&infra, &cluster).await;
                operation::record(&api, infra.as_ref(), &self.metrics, type_, result).await?;
                operation::clear_operation_annotation(&api, infra.as_ref()).await?;
                Ok(Action::await_change())
            }
            Operation::Restore | Operation::Reconcile => {
                operation::ensure_finalizer(&api, infra.as_ref()).await?;
                let result = if op == Operation::Restore {
                    self.actuator.restore(&infra, &cluster, cancel).await
                } else {
                    self.actuator.reconcile(&infra, &cluster, cancel).await
                };
                operation::record(&api, infra.as_ref(), &self.metrics, type_, result.map(|_| ())).await?;
                operation::clear_operation_annotation(&api, infra.as_ref()).await?;
                Ok(Action::await_change())
            }
        }
    }
}

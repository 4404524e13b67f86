//! Infrastructure actuator: Reconcile, Delete, Restore and Migrate

use std::sync::Arc;
use std::time::Duration;

use azure_api::annotations;
use azure_api::extensions::ClusterContext;
use azure_api::internal::{decode, validate_infrastructure_config, InfrastructureConfig, InfrastructureStatus};
use azure_api::v1alpha1::CloudProfileConfig;
use azure_api::Infrastructure;
use azure_client::{ClientAuth, CloudInstance, Factory, FactoryProvider};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::InfrastructureClient;
use super::context::FlowContext;
use super::delete::delete_graph;
use super::migration::{classify_state, LegacyArtifacts, StateOrigin, LEGACY_FINALIZER};
use super::plan::InfrastructurePlan;
use super::reconcile::reconcile_graph;
use super::status::compute_status;
use crate::config::ControllerConfig;
use crate::error::AzureResultExt;
use crate::flow::{keys, Flow, RunOptions, Whiteboard};
use crate::metrics::ControllerMetrics;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct ActuatorOptions {
    pub flow_concurrency: usize,
    pub task_timeout: Duration,
    pub metrics: Option<ControllerMetrics>,
}

impl Default for ActuatorOptions {
    fn default() -> Self {
        Self {
            flow_concurrency: 4,
            task_timeout: Duration::from_secs(15 * 60),
            metrics: None,
        }
    }
}

impl From<&ControllerConfig> for ActuatorOptions {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            flow_concurrency: config.flow_concurrency,
            task_timeout: config.task_timeout,
            metrics: None,
        }
    }
}

pub struct InfrastructureActuator {
    client: Arc<dyn InfrastructureClient>,
    provider: Arc<dyn FactoryProvider>,
    options: ActuatorOptions,
}

/// Identity and decoded inputs of one Infrastructure
struct Target {
    namespace: String,
    name: String,
    key: String,
    config: InfrastructureConfig,
    cloud_profile: CloudProfileConfig,
}

impl InfrastructureActuator {
    pub fn new(
        client: Arc<dyn InfrastructureClient>,
        provider: Arc<dyn FactoryProvider>,
        options: ActuatorOptions,
    ) -> Self {
        Self {
            client,
            provider,
            options,
        }
    }

    fn target(infra: &Infrastructure, cluster: &ClusterContext) -> Result<Target> {
        let namespace = infra
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| Error::internal("infrastructure has no namespace"))?;
        let name = infra
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::internal("infrastructure has no name"))?;

        let config = decode::infrastructure_config(infra.spec.provider_config.as_ref())?;
        validate_infrastructure_config(&config)?;
        let cloud_profile = cluster.cloud_profile.provider_config()?;

        Ok(Target {
            key: format!("{}/{}", namespace, name),
            namespace,
            name,
            config,
            cloud_profile,
        })
    }

    async fn factory(
        &self,
        infra: &Infrastructure,
        cloud_profile: &CloudProfileConfig,
    ) -> Result<Arc<dyn Factory>> {
        let secret_ref = &infra.spec.secret_ref;
        let secret = self
            .client
            .get_secret(&secret_ref.namespace, &secret_ref.name)
            .await?;
        let auth = ClientAuth::from_secret(&secret)
            .with_action(|| format!("read credentials from secret {}/{}", secret_ref.namespace, secret_ref.name))?;

        let configured = cloud_profile.cloud_configuration.as_ref().map(|c| c.name.as_str());
        let cloud = CloudInstance::select(configured, &infra.spec.region)
            .with_action(|| "select the Azure cloud instance".to_string())?
            .configuration();

        self.provider
            .factory(auth, cloud)
            .with_action(|| "create the Azure client".to_string())
    }

    /// Load the persisted state. A legacy state is replaced by a native one
    /// that keeps Delete from short-circuiting.
    async fn load_state(&self, infra: &Infrastructure, target: &Target) -> Result<Whiteboard> {
        let raw = infra.status.as_ref().and_then(|s| s.state.as_ref());
        match classify_state(raw) {
            StateOrigin::Native(state) => Ok(Whiteboard::new(state.data)),
            StateOrigin::Absent => Ok(Whiteboard::default()),
            StateOrigin::Legacy => {
                info!(infrastructure = %target.key, "Migrating state of the legacy reconciler");
                let whiteboard = Whiteboard::default();
                whiteboard.mark_created_resources_exist();
                whiteboard.set(keys::LEGACY_CLEANUP_PENDING, "true");
                self.persist_state(target, &whiteboard).await?;
                Ok(whiteboard)
            }
        }
    }

    async fn persist_state(&self, target: &Target, whiteboard: &Whiteboard) -> Result<()> {
        let state = serde_json::to_value(whiteboard.to_state())?;
        self.client
            .patch_status(&target.namespace, &target.name, json!({ "state": state }))
            .await
    }

    async fn run_flow(
        &self,
        flow: &Flow<FlowContext>,
        ctx: Arc<FlowContext>,
        target: &Target,
        cancel: CancellationToken,
    ) -> Result<()> {
        let options = RunOptions {
            concurrency: self.options.flow_concurrency,
            task_timeout: self.options.task_timeout,
            cancel,
            metrics: self.options.metrics.clone(),
        };
        let whiteboard = ctx.whiteboard.clone();
        let result = flow
            .run(ctx, &options, |task| {
                let whiteboard = whiteboard.clone();
                async move {
                    debug!(infrastructure = %target.key, task = %task, "Persisting state");
                    self.persist_state(target, &whiteboard).await
                }
            })
            .await;

        if let Err(e) = result {
            // Keep what the finished tasks recorded before reporting the failure
            if let Err(persist) = self.persist_state(target, &whiteboard).await {
                warn!(infrastructure = %target.key, error = %persist, "Failed to persist state after flow failure");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn flow_context(
        &self,
        infra: &Infrastructure,
        cluster: &ClusterContext,
        target: &Target,
        factory: Arc<dyn Factory>,
        whiteboard: Whiteboard,
    ) -> Result<FlowContext> {
        let vmo = annotations::is_true(cluster.shoot.metadata.annotations.as_ref(), annotations::VMO);
        let migrated_zone = infra
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotations::NETWORK_LAYOUT_ZONE_MIGRATION))
            .map(|zone| {
                zone.trim().parse::<i32>().map_err(|_| {
                    Error::configuration(format!(
                        "annotation {} must name a zone, got {:?}",
                        annotations::NETWORK_LAYOUT_ZONE_MIGRATION,
                        zone
                    ))
                })
            })
            .transpose()?;

        Ok(FlowContext {
            key: target.key.clone(),
            region: infra.spec.region.clone(),
            plan: InfrastructurePlan::new(&target.namespace, &target.config, vmo, migrated_zone),
            config: target.config.clone(),
            cloud_profile: target.cloud_profile.clone(),
            factory,
            whiteboard,
        })
    }

    /// Converge Azure to the declared configuration and publish the provider
    /// status and state.
    pub async fn reconcile(
        &self,
        infra: &Infrastructure,
        cluster: &ClusterContext,
        cancel: CancellationToken,
    ) -> Result<InfrastructureStatus> {
        let target = Self::target(infra, cluster)?;
        info!(infrastructure = %target.key, region = %infra.spec.region, "Reconciling infrastructure");

        let whiteboard = self.load_state(infra, &target).await?;
        let factory = self.factory(infra, &target.cloud_profile).await?;
        let ctx = Arc::new(self.flow_context(infra, cluster, &target, factory, whiteboard)?);

        let flow = reconcile_graph().compile()?;
        self.run_flow(&flow, ctx.clone(), &target, cancel).await?;

        let previous = infra
            .status
            .as_ref()
            .and_then(|s| s.provider_status.as_ref())
            .and_then(|raw| decode::infrastructure_status(raw).ok());
        let status = compute_status(&ctx, previous.as_ref());

        let provider_status = decode::encode_infrastructure_status(&status)?;
        let state = serde_json::to_value(ctx.whiteboard.to_state())?;
        self.client
            .patch_status(
                &target.namespace,
                &target.name,
                json!({ "providerStatus": provider_status, "state": state }),
            )
            .await?;

        if ctx.whiteboard.is_true(keys::LEGACY_CLEANUP_PENDING) {
            self.cleanup_legacy_artifacts(&target.namespace, &target.name).await?;
            ctx.whiteboard.remove(keys::LEGACY_CLEANUP_PENDING);
            self.persist_state(&target, &ctx.whiteboard).await?;
        }

        info!(infrastructure = %target.key, "Reconciled infrastructure");
        Ok(status)
    }

    /// Remove everything the flow created. User-owned resource groups,
    /// foreign VNets and identities are kept.
    pub async fn delete(
        &self,
        infra: &Infrastructure,
        cluster: &ClusterContext,
        cancel: CancellationToken,
    ) -> Result<()> {
        let target = Self::target(infra, cluster)?;
        info!(infrastructure = %target.key, "Deleting infrastructure");

        let raw = infra.status.as_ref().and_then(|s| s.state.as_ref());
        // Without a native state a failed write may have lost the flag, so
        // only the resource group lookup below can tell whether Azure is empty
        let whiteboard = match classify_state(raw) {
            StateOrigin::Native(state) => Whiteboard::new(state.data),
            StateOrigin::Legacy | StateOrigin::Absent => {
                let whiteboard = Whiteboard::default();
                whiteboard.mark_created_resources_exist();
                whiteboard
            }
        };
        let has_provider_status = infra
            .status
            .as_ref()
            .map(|s| s.provider_status.is_some())
            .unwrap_or(false);
        if !whiteboard.created_resources_exist() && !has_provider_status {
            info!(infrastructure = %target.key, "No resources were created, skipping Azure deletion");
            return self.cleanup_legacy_artifacts(&target.namespace, &target.name).await;
        }

        let factory = self.factory(infra, &target.cloud_profile).await?;
        let ctx = Arc::new(self.flow_context(infra, cluster, &target, factory, whiteboard)?);

        match ctx.factory.resource_groups().get(&ctx.plan.resource_group).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(
                    infrastructure = %target.key,
                    resource_group = %ctx.plan.resource_group,
                    "Resource group does not exist, nothing to delete"
                );
                return self.cleanup_legacy_artifacts(&target.namespace, &target.name).await;
            }
            Err(e) if e.is_unauthenticated() || e.is_unauthorized() => {
                warn!(
                    infrastructure = %target.key,
                    error = %e,
                    "Credentials are not accepted by Azure, skipping Azure deletion"
                );
                return self.cleanup_legacy_artifacts(&target.namespace, &target.name).await;
            }
            Err(e) => {
                return Err(Error::azure(
                    format!("get resource group {}", ctx.plan.resource_group),
                    e,
                ))
            }
        }

        let flow = delete_graph(&ctx).compile()?;
        self.run_flow(&flow, ctx.clone(), &target, cancel).await?;

        self.cleanup_legacy_artifacts(&target.namespace, &target.name).await?;
        info!(infrastructure = %target.key, "Deleted infrastructure");
        Ok(())
    }

    /// Rebuild from `status.state` after a control plane migration, then reconcile
    pub async fn restore(
        &self,
        infra: &Infrastructure,
        cluster: &ClusterContext,
        cancel: CancellationToken,
    ) -> Result<InfrastructureStatus> {
        let present = infra.status.as_ref().and_then(|s| s.state.as_ref()).is_some();
        info!(
            infrastructure = ?infra.metadata.name,
            state_present = present,
            "Restoring infrastructure"
        );
        self.reconcile(infra, cluster, cancel).await
    }

    /// Release seed-local artifacts. Azure is not touched and the state stays
    /// on the resource for the restore.
    pub async fn migrate(&self, infra: &Infrastructure, _cluster: &ClusterContext) -> Result<()> {
        let namespace = infra
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::internal("infrastructure has no namespace"))?;
        let name = infra
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::internal("infrastructure has no name"))?;
        info!(infrastructure = %format!("{}/{}", namespace, name), "Migrating infrastructure");
        self.cleanup_legacy_artifacts(namespace, name).await
    }

    async fn cleanup_legacy_artifacts(&self, namespace: &str, name: &str) -> Result<()> {
        let artifacts = LegacyArtifacts::for_infrastructure(name);
        for config_map in &artifacts.config_maps {
            self.client.delete_config_map(namespace, config_map).await?;
        }
        for secret in &artifacts.secrets {
            self.client.delete_secret(namespace, secret).await?;
        }
        self.client
            .remove_finalizer(namespace, name, LEGACY_FINALIZER)
            .await?;
        debug!(namespace, name, "Removed legacy reconciler artifacts");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::client::MockInfrastructureClient;
    use azure_api::extensions::infrastructure::{InfrastructureSpec, InfrastructureStatus as ResourceStatus};
    use azure_api::extensions::SecretReference;
    use azure_client::fake::FakeAzure;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn secret() -> Secret {
        let data = [
            ("clientID", "client"),
            ("clientSecret", "secret"),
            ("subscriptionID", azure_client::fake::FAKE_SUBSCRIPTION),
            ("tenantID", "tenant"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
        .collect::<BTreeMap<_, _>>();
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    fn infrastructure(state: Option<Value>) -> Infrastructure {
        Infrastructure {
            metadata: ObjectMeta {
                name: Some("az".into()),
                namespace: Some("shoot--foo--az".into()),
                ..Default::default()
            },
            spec: InfrastructureSpec {
                type_: "azure".into(),
                region: "westeurope".into(),
                secret_ref: SecretReference {
                    name: "cloudprovider".into(),
                    namespace: "shoot--foo--az".into(),
                },
                provider_config: Some(json!({
                    "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
                    "kind": "InfrastructureConfig",
                    "networks": {"vnet": {"cidr": "10.250.0.0/16"}, "workers": "10.250.0.0/19"},
                    "zoned": true
                })),
                ssh_public_key: None,
            },
            status: state.map(|state| ResourceStatus {
                state: Some(state),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn test_delete_with_state_lacking_created_resources_skips_azure() {
        let azure = FakeAzure::new();
        let mut client = MockInfrastructureClient::new();
        client.expect_get_secret().never();
        client.expect_delete_config_map().times(2).returning(|_, _| Ok(()));
        client.expect_delete_secret().times(1).returning(|_, _| Ok(()));
        client
            .expect_remove_finalizer()
            .withf(|_, name, finalizer| name == "az" && finalizer == LEGACY_FINALIZER)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let actuator = InfrastructureActuator::new(
            Arc::new(client),
            Arc::new(azure.clone()),
            ActuatorOptions::default(),
        );
        let state = serde_json::to_value(azure_api::v1alpha1::InfrastructureState::new(BTreeMap::new())).unwrap();
        actuator
            .delete(&infrastructure(Some(state)), &ClusterContext::default(), CancellationToken::new())
            .await
            .unwrap();
        assert!(azure.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_without_state_looks_up_the_resource_group() {
        let azure = FakeAzure::new();
        azure.add_resource_group("shoot--foo--az", "westeurope");
        let mut client = MockInfrastructureClient::new();
        client.expect_get_secret().returning(|_, _| Ok(secret()));
        client.expect_patch_status().returning(|_, _, _| Ok(()));
        client.expect_delete_config_map().returning(|_, _| Ok(()));
        client.expect_delete_secret().returning(|_, _| Ok(()));
        client.expect_remove_finalizer().returning(|_, _, _| Ok(()));

        let actuator = InfrastructureActuator::new(
            Arc::new(client),
            Arc::new(azure.clone()),
            ActuatorOptions::default(),
        );
        actuator
            .delete(&infrastructure(None), &ClusterContext::default(), CancellationToken::new())
            .await
            .unwrap();
        assert!(azure.resource_group("shoot--foo--az").is_none());
    }

    #[tokio::test]
    async fn test_delete_with_rejected_credentials_succeeds() {
        let azure = FakeAzure::new();
        azure.reject_credentials();
        let mut client = MockInfrastructureClient::new();
        client.expect_get_secret().returning(|_, _| Ok(secret()));
        client.expect_delete_config_map().returning(|_, _| Ok(()));
        client.expect_delete_secret().returning(|_, _| Ok(()));
        client.expect_remove_finalizer().returning(|_, _, _| Ok(()));

        let actuator = InfrastructureActuator::new(
            Arc::new(client),
            Arc::new(azure.clone()),
            ActuatorOptions::default(),
        );
        let state = serde_json::to_value(azure_api::v1alpha1::InfrastructureState::new(
            [(keys::CREATED_RESOURCES_EXIST.to_string(), "true".to_string())].into(),
        ))
        .unwrap();
        actuator
            .delete(&infrastructure(Some(state)), &ClusterContext::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(azure.writes(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_are_surfaced() {
        let mut client = MockInfrastructureClient::new();
        client.expect_get_secret().returning(|_, _| Ok(Secret::default()));
        client.expect_patch_status().returning(|_, _, _| Ok(()));

        let actuator = InfrastructureActuator::new(
            Arc::new(client),
            Arc::new(FakeAzure::new()),
            ActuatorOptions::default(),
        );
        let err = actuator
            .reconcile(&infrastructure(None), &ClusterContext::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.codes(), vec![crate::ErrorCode::Unauthenticated]);
    }

    #[tokio::test]
    async fn test_migrate_only_touches_the_seed() {
        let azure = FakeAzure::new();
        let mut client = MockInfrastructureClient::new();
        client
            .expect_delete_config_map()
            .withf(|ns, name| ns == "shoot--foo--az" && name.starts_with("az.infra.tf-"))
            .times(2)
            .returning(|_, _| Ok(()));
        client
            .expect_delete_secret()
            .withf(|_, name| name == "az.infra.tf-vars")
            .times(1)
            .returning(|_, _| Ok(()));
        client.expect_remove_finalizer().times(1).returning(|_, _, _| Ok(()));
        client.expect_patch_status().never();

        let actuator = InfrastructureActuator::new(
            Arc::new(client),
            Arc::new(azure.clone()),
            ActuatorOptions::default(),
        );
        actuator
            .migrate(&infrastructure(None), &ClusterContext::default())
            .await
            .unwrap();
        assert!(azure.calls().is_empty());
    }
}

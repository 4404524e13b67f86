//! Remedy controller cleanup around the ControlPlane lifecycle
//!
//! The remedy controller runs next to the shoot's control plane and keeps
//! finalizers on its `PublicIPAddress` and `VirtualMachine` resources in the
//! seed and on `LoadBalancer` services in the shoot. Before the control plane
//! goes away those finalizers have to be released, otherwise the namespace
//! never finishes deleting.
//!
//! Delete first gives the remedy controller `graceful_deletion_timeout` to
//! clean up on its own, asking to be requeued every `wait_interval`. After the
//! timeout, and right away on force-delete and migrate, the resources are
//! purged: finalizers removed, then every object of both kinds deleted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use azure_api::extensions::ClusterContext;
use azure_api::remedy::SERVICE_FINALIZER;
use azure_api::ControlPlane;
use azure_client::{retry_with_backoff, RetryConfig};
use tracing::{debug, info, warn};

use super::actuator::ControlPlaneActuator;
use super::remedy::{RemedyClient, RemedyKind, ShootClientFactory};
use crate::config::{ControllerConfig, FeatureGates};
use crate::{Error, Result};

const SERVICE_FINALIZER_ATTEMPTS: u32 = 5;

/// Decorates a [`ControlPlaneActuator`] with the remedy cleanup
pub struct RemedyPurgingActuator<A> {
    inner: A,
    remedy: Arc<dyn RemedyClient>,
    shoots: Arc<dyn ShootClientFactory>,
    graceful_deletion_timeout: Duration,
    wait_interval: Duration,
    feature_gates: FeatureGates,
}

impl<A: ControlPlaneActuator> RemedyPurgingActuator<A> {
    pub fn new(
        inner: A,
        remedy: Arc<dyn RemedyClient>,
        shoots: Arc<dyn ShootClientFactory>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            inner,
            remedy,
            shoots,
            graceful_deletion_timeout: config.graceful_deletion_timeout,
            wait_interval: config.graceful_deletion_wait_interval,
            feature_gates: config.feature_gates,
        }
    }

    /// Time since the control plane was marked for deletion; zero when it is not
    fn deletion_age(cp: &ControlPlane) -> Duration {
        cp.metadata
            .deletion_timestamp
            .as_ref()
            .and_then(|ts| (chrono::Utc::now() - ts.0).to_std().ok())
            .unwrap_or_default()
    }

    /// Requeue while public IP resources remain and the grace period runs
    async fn wait_graceful(&self, namespace: &str, cp: &ControlPlane) -> Result<()> {
        let remaining = self.remedy.list(namespace, RemedyKind::PublicIpAddress).await?;
        if remaining.is_empty() {
            return Ok(());
        }

        let age = Self::deletion_age(cp);
        if age < self.graceful_deletion_timeout {
            info!(
                namespace,
                remaining = remaining.len(),
                age_secs = age.as_secs(),
                "Waiting for the remedy controller to release public IP addresses"
            );
            return Err(Error::requeue_after(
                self.wait_interval,
                format!("{} PublicIPAddress resources remain", remaining.len()),
            ));
        }

        warn!(
            namespace,
            remaining = remaining.len(),
            "Graceful deletion timed out, purging remedy resources"
        );
        Ok(())
    }

    async fn purge_seed(&self, namespace: &str) -> Result<()> {
        for kind in RemedyKind::ALL {
            let finalizer = kind.finalizer();
            for object in self.remedy.list(namespace, kind).await? {
                if object.finalizers.iter().any(|f| f == finalizer) {
                    self.remedy
                        .remove_finalizer(namespace, kind, &object.name, finalizer)
                        .await?;
                }
            }
            self.remedy.delete_all(namespace, kind).await?;
            debug!(namespace, kind = %kind, "Purged remedy resources");
        }
        Ok(())
    }

    /// Release the remedy finalizer of every load balancer service in the
    /// shoot. Only a failing listing is reported.
    async fn purge_shoot(&self, namespace: &str) -> Result<()> {
        let shoot = self.shoots.shoot_client(namespace).await?;
        let services = shoot.list_load_balancer_services().await?;
        let config = RetryConfig::with_max_attempts(SERVICE_FINALIZER_ATTEMPTS);

        for service in services {
            if !service.finalizers.iter().any(|f| f == SERVICE_FINALIZER) {
                continue;
            }
            let result = retry_with_backoff(&config, "remove service finalizer", Error::is_conflict, || {
                let shoot = shoot.clone();
                let (ns, name) = (service.namespace.clone(), service.name.clone());
                async move { shoot.remove_service_finalizer(&ns, &name, SERVICE_FINALIZER).await }
            })
            .await;

            match result {
                Ok(()) => debug!(service = %service.name, namespace = %service.namespace, "Removed remedy finalizer"),
                Err(e) => warn!(
                    service = %service.name,
                    namespace = %service.namespace,
                    error = %e,
                    "Failed to remove remedy finalizer"
                ),
            }
        }
        Ok(())
    }
}

fn namespace_of(cp: &ControlPlane) -> Result<&str> {
    cp.metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::internal("control plane has no namespace"))
}

#[async_trait]
impl<A: ControlPlaneActuator> ControlPlaneActuator for RemedyPurgingActuator<A> {
    async fn reconcile(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()> {
        self.inner.reconcile(cp, cluster).await?;

        if !self.feature_gates.disable_remedy_controller {
            return Ok(());
        }
        let namespace = namespace_of(cp)?;
        self.purge_seed(namespace).await?;
        if cluster.shoot.is_hibernated() {
            debug!(namespace, "Shoot is hibernated, leaving its services alone");
            return Ok(());
        }
        self.purge_shoot(namespace).await
    }

    async fn delete(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()> {
        let namespace = namespace_of(cp)?;
        self.wait_graceful(namespace, cp).await?;
        self.purge_seed(namespace).await?;
        self.inner.delete(cp, cluster).await
    }

    async fn force_delete(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()> {
        self.purge_seed(namespace_of(cp)?).await?;
        self.inner.force_delete(cp, cluster).await
    }

    async fn migrate(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()> {
        self.purge_seed(namespace_of(cp)?).await?;
        self.inner.migrate(cp, cluster).await
    }

    async fn restore(&self, cp: &ControlPlane, cluster: &ClusterContext) -> Result<()> {
        self.inner.restore(cp, cluster).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::actuator::MockControlPlaneActuator;
    use azure_api::annotations;
    use crate::controlplane::remedy::{
        LoadBalancerService, MockRemedyClient, MockShootClient, MockShootClientFactory, RemedyObject,
        ShootClient,
    };
    use azure_api::shoot::{Hibernation, ShootStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::atomic::{AtomicU32, Ordering};

    const NAMESPACE: &str = "shoot--foo--az";

    fn config() -> ControllerConfig {
        ControllerConfig {
            graceful_deletion_timeout: Duration::from_secs(600),
            graceful_deletion_wait_interval: Duration::from_secs(42),
            ..Default::default()
        }
    }

    fn remedy_disabled_config() -> ControllerConfig {
        let mut config = config();
        config.feature_gates.disable_remedy_controller = true;
        config
    }

    fn control_plane(deleted_ago: Option<Duration>) -> ControlPlane {
        let mut cp = ControlPlane::new("control-plane", Default::default());
        cp.metadata.namespace = Some(NAMESPACE.into());
        cp.metadata.deletion_timestamp = deleted_ago
            .map(|ago| Time(chrono::Utc::now() - chrono::Duration::from_std(ago).unwrap()));
        cp
    }

    fn public_ip(name: &str) -> RemedyObject {
        RemedyObject {
            name: name.into(),
            finalizers: vec![RemedyKind::PublicIpAddress.finalizer().into()],
        }
    }

    fn purging_remedy() -> MockRemedyClient {
        let mut remedy = MockRemedyClient::new();
        remedy
            .expect_list()
            .withf(|_, kind| *kind == RemedyKind::PublicIpAddress)
            .returning(|_, _| Ok(vec![public_ip("ip-1")]));
        remedy
            .expect_list()
            .withf(|_, kind| *kind == RemedyKind::VirtualMachine)
            .returning(|_, _| Ok(vec![RemedyObject { name: "vm-1".into(), finalizers: vec![] }]));
        remedy
            .expect_remove_finalizer()
            .withf(|ns, kind, name, finalizer| {
                ns == NAMESPACE
                    && *kind == RemedyKind::PublicIpAddress
                    && name == "ip-1"
                    && finalizer == "azure.remedy.gardener.cloud/publicipaddress"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        remedy
            .expect_delete_all()
            .withf(|ns, _| ns == NAMESPACE)
            .times(2)
            .returning(|_, _| Ok(()));
        remedy
    }

    fn actuator(
        inner: MockControlPlaneActuator,
        remedy: MockRemedyClient,
        shoots: MockShootClientFactory,
        config: &ControllerConfig,
    ) -> RemedyPurgingActuator<MockControlPlaneActuator> {
        RemedyPurgingActuator::new(inner, Arc::new(remedy), Arc::new(shoots), config)
    }

    #[tokio::test]
    async fn test_delete_waits_while_public_ips_remain() {
        let mut inner = MockControlPlaneActuator::new();
        inner.expect_delete().never();
        let mut remedy = MockRemedyClient::new();
        remedy
            .expect_list()
            .returning(|_, _| Ok(vec![public_ip("ip-1")]));
        remedy.expect_delete_all().never();

        let actuator = actuator(inner, remedy, MockShootClientFactory::new(), &config());
        let cp = control_plane(Some(Duration::from_secs(60)));
        let err = actuator.delete(&cp, &ClusterContext::default()).await.unwrap_err();

        match err {
            Error::RequeueAfter { after, .. } => assert_eq!(after, Duration::from_secs(42)),
            other => panic!("expected requeue, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_purges_after_timeout() {
        let mut inner = MockControlPlaneActuator::new();
        inner.expect_delete().times(1).returning(|_, _| Ok(()));

        let actuator = actuator(inner, purging_remedy(), MockShootClientFactory::new(), &config());
        let cp = control_plane(Some(Duration::from_secs(601)));
        actuator.delete(&cp, &ClusterContext::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_without_public_ips_does_not_wait() {
        let mut inner = MockControlPlaneActuator::new();
        inner.expect_delete().times(1).returning(|_, _| Ok(()));
        let mut remedy = MockRemedyClient::new();
        remedy.expect_list().returning(|_, _| Ok(vec![]));
        remedy.expect_remove_finalizer().never();
        remedy.expect_delete_all().times(2).returning(|_, _| Ok(()));

        let actuator = actuator(inner, remedy, MockShootClientFactory::new(), &config());
        actuator
            .delete(&control_plane(Some(Duration::ZERO)), &ClusterContext::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_force_delete_and_migrate_skip_the_wait() {
        let mut inner = MockControlPlaneActuator::new();
        inner.expect_force_delete().times(1).returning(|_, _| Ok(()));
        let actuator = actuator(inner, purging_remedy(), MockShootClientFactory::new(), &config());
        actuator
            .force_delete(&control_plane(Some(Duration::ZERO)), &ClusterContext::default())
            .await
            .unwrap();

        let mut inner = MockControlPlaneActuator::new();
        inner.expect_migrate().times(1).returning(|_, _| Ok(()));
        let actuator = self::actuator(inner, purging_remedy(), MockShootClientFactory::new(), &config());
        actuator
            .migrate(&control_plane(None), &ClusterContext::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_purge_does_not_delegate() {
        let mut inner = MockControlPlaneActuator::new();
        inner.expect_force_delete().never();
        let mut remedy = MockRemedyClient::new();
        remedy
            .expect_list()
            .returning(|_, _| Err(Error::internal("seed unreachable")));

        let actuator = actuator(inner, remedy, MockShootClientFactory::new(), &config());
        assert!(actuator
            .force_delete(&control_plane(None), &ClusterContext::default())
            .await
            .is_err());
    }

    fn conflict() -> Error {
        Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "the object has been modified".into(),
            reason: "Conflict".into(),
            code: 409,
        }))
    }

    fn shoot_cluster(hibernated: bool) -> ClusterContext {
        let mut cluster = ClusterContext::default();
        if hibernated {
            cluster.shoot.spec.hibernation = Some(Hibernation {
                enabled: Some(true),
                ..Default::default()
            });
            cluster.shoot.status = Some(ShootStatus {
                is_hibernated: Some(true),
                ..Default::default()
            });
        }
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_releases_service_finalizers_with_conflict_retry() {
        let mut inner = MockControlPlaneActuator::new();
        inner.expect_reconcile().times(1).returning(|_, _| Ok(()));

        let mut shoot = MockShootClient::new();
        shoot.expect_list_load_balancer_services().returning(|| {
            Ok(vec![
                LoadBalancerService {
                    namespace: "default".into(),
                    name: "ingress".into(),
                    finalizers: vec![SERVICE_FINALIZER.into()],
                },
                LoadBalancerService {
                    namespace: "default".into(),
                    name: "plain".into(),
                    finalizers: vec![],
                },
            ])
        });
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        shoot
            .expect_remove_service_finalizer()
            .withf(|ns, name, finalizer| ns == "default" && name == "ingress" && finalizer == SERVICE_FINALIZER)
            .returning(move |_, _, _| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(conflict())
                } else {
                    Ok(())
                }
            });
        let shoot: Arc<dyn ShootClient> = Arc::new(shoot);
        let mut shoots = MockShootClientFactory::new();
        shoots
            .expect_shoot_client()
            .withf(|ns| ns == NAMESPACE)
            .returning(move |_| Ok(shoot.clone()));

        let mut remedy = MockRemedyClient::new();
        remedy.expect_list().returning(|_, _| Ok(vec![]));
        remedy.expect_delete_all().times(2).returning(|_, _| Ok(()));

        let actuator = actuator(inner, remedy, shoots, &remedy_disabled_config());
        actuator
            .reconcile(&control_plane(None), &shoot_cluster(false))
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reconcile_ignores_finalizer_failures_but_not_listing_failures() {
        let mut shoot = MockShootClient::new();
        shoot.expect_list_load_balancer_services().returning(|| {
            Ok(vec![LoadBalancerService {
                namespace: "default".into(),
                name: "ingress".into(),
                finalizers: vec![SERVICE_FINALIZER.into()],
            }])
        });
        shoot
            .expect_remove_service_finalizer()
            .times(1)
            .returning(|_, _, _| Err(Error::internal("forbidden")));
        let shoot: Arc<dyn ShootClient> = Arc::new(shoot);
        let mut shoots = MockShootClientFactory::new();
        shoots.expect_shoot_client().returning(move |_| Ok(shoot.clone()));

        let mut remedy = MockRemedyClient::new();
        remedy.expect_list().returning(|_, _| Ok(vec![]));
        remedy.expect_delete_all().returning(|_, _| Ok(()));

        let mut inner = MockControlPlaneActuator::new();
        inner.expect_reconcile().returning(|_, _| Ok(()));
        let actuator = actuator(inner, remedy, shoots, &remedy_disabled_config());
        actuator
            .reconcile(&control_plane(None), &shoot_cluster(false))
            .await
            .unwrap();

        let mut shoot = MockShootClient::new();
        shoot
            .expect_list_load_balancer_services()
            .returning(|| Err(Error::internal("shoot unreachable")));
        let shoot: Arc<dyn ShootClient> = Arc::new(shoot);
        let mut shoots = MockShootClientFactory::new();
        shoots.expect_shoot_client().returning(move |_| Ok(shoot.clone()));
        let mut remedy = MockRemedyClient::new();
        remedy.expect_list().returning(|_, _| Ok(vec![]));
        remedy.expect_delete_all().returning(|_, _| Ok(()));
        let mut inner = MockControlPlaneActuator::new();
        inner.expect_reconcile().returning(|_, _| Ok(()));
        let actuator = self::actuator(inner, remedy, shoots, &remedy_disabled_config());
        assert!(actuator
            .reconcile(&control_plane(None), &shoot_cluster(false))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reconcile_leaves_hibernated_shoot_alone() {
        let mut inner = MockControlPlaneActuator::new();
        inner.expect_reconcile().times(1).returning(|_, _| Ok(()));
        let mut shoots = MockShootClientFactory::new();
        shoots.expect_shoot_client().never();
        let mut remedy = MockRemedyClient::new();
        remedy.expect_list().returning(|_, _| Ok(vec![]));
        remedy.expect_delete_all().times(2).returning(|_, _| Ok(()));

        let actuator = actuator(inner, remedy, shoots, &remedy_disabled_config());
        actuator
            .reconcile(&control_plane(None), &shoot_cluster(true))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_with_active_remedy_controller_only_delegates() {
        let mut inner = MockControlPlaneActuator::new();
        inner.expect_reconcile().times(1).returning(|_, _| Ok(()));
        let mut remedy = MockRemedyClient::new();
        remedy.expect_list().never();
        let mut shoots = MockShootClientFactory::new();
        shoots.expect_shoot_client().never();

        let actuator = actuator(inner, remedy, shoots, &config());
        actuator
            .reconcile(&control_plane(None), &ClusterContext::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shoot_annotation_alone_does_not_purge() {
        let mut inner = MockControlPlaneActuator::new();
        inner.expect_reconcile().times(1).returning(|_, _| Ok(()));
        let mut remedy = MockRemedyClient::new();
        remedy.expect_list().never();
        remedy.expect_delete_all().never();
        let mut shoots = MockShootClientFactory::new();
        shoots.expect_shoot_client().never();

        let mut cluster = ClusterContext::default();
        cluster.shoot.metadata.annotations = Some(
            [(annotations::DISABLE_REMEDY_CONTROLLER.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        );
        let actuator = actuator(inner, remedy, shoots, &config());
        actuator.reconcile(&control_plane(None), &cluster).await.unwrap();
    }
}

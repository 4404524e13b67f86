//! Access to the remedy controller's resources in the seed and the shoot

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use azure_api::remedy::{
    PublicIPAddress, VirtualMachine, PUBLIC_IP_ADDRESS_FINALIZER, VIRTUAL_MACHINE_FINALIZER,
};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::infrastructure::client::finalizer_patch;
use crate::{Error, Result};

/// Seed secret holding the kubeconfig gardener uses to reach the shoot
pub const SHOOT_ACCESS_SECRET: &str = "gardener";
const KUBECONFIG_KEY: &str = "kubeconfig";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemedyKind {
    PublicIpAddress,
    VirtualMachine,
}

impl RemedyKind {
    pub const ALL: [RemedyKind; 2] = [RemedyKind::PublicIpAddress, RemedyKind::VirtualMachine];

    pub fn finalizer(&self) -> &'static str {
        match self {
            Self::PublicIpAddress => PUBLIC_IP_ADDRESS_FINALIZER,
            Self::VirtualMachine => VIRTUAL_MACHINE_FINALIZER,
        }
    }
}

impl std::fmt::Display for RemedyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PublicIpAddress => f.write_str("PublicIPAddress"),
            Self::VirtualMachine => f.write_str("VirtualMachine"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemedyObject {
    pub name: String,
    pub finalizers: Vec<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemedyClient: Send + Sync {
    async fn list(&self, namespace: &str, kind: RemedyKind) -> Result<Vec<RemedyObject>>;

    async fn remove_finalizer(
        &self,
        namespace: &str,
        kind: RemedyKind,
        name: &str,
        finalizer: &str,
    ) -> Result<()>;

    async fn delete_all(&self, namespace: &str, kind: RemedyKind) -> Result<()>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadBalancerService {
    pub namespace: String,
    pub name: String,
    pub finalizers: Vec<String>,
}

/// Access to one shoot cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ShootClient: Send + Sync {
    async fn list_load_balancer_services(&self) -> Result<Vec<LoadBalancerService>>;

    /// Fails with a conflict when the service changed since it was read
    async fn remove_service_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ShootClientFactory: Send + Sync {
    /// Client of the shoot whose control plane lives in `namespace`
    async fn shoot_client(&self, namespace: &str) -> Result<Arc<dyn ShootClient>>;
}

pub struct KubeRemedyClient {
    client: Client,
}

impl KubeRemedyClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn list_objects<K>(api: Api<K>) -> Result<Vec<RemedyObject>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let list = api.list(&ListParams::default()).await?;
    Ok(list
        .items
        .into_iter()
        .map(|item| {
            let meta = item.meta();
            RemedyObject {
                name: meta.name.clone().unwrap_or_default(),
                finalizers: meta.finalizers.clone().unwrap_or_default(),
            }
        })
        .collect())
}

async fn remove_object_finalizer<K>(api: Api<K>, name: &str, finalizer: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let Some(current) = api.get_opt(name).await? else {
        return Ok(());
    };
    let finalizers = current.meta().finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == finalizer) {
        return Ok(());
    }
    let remaining = finalizers.into_iter().filter(|f| f != finalizer).collect();
    api.patch(
        name,
        &PatchParams::default(),
        &Patch::Merge(finalizer_patch(current.meta(), remaining)),
    )
    .await?;
    Ok(())
}

async fn delete_objects<K>(api: Api<K>) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete_collection(&DeleteParams::default(), &ListParams::default())
        .await?;
    Ok(())
}

#[async_trait]
impl RemedyClient for KubeRemedyClient {
    async fn list(&self, namespace: &str, kind: RemedyKind) -> Result<Vec<RemedyObject>> {
        match kind {
            RemedyKind::PublicIpAddress => {
                list_objects(Api::<PublicIPAddress>::namespaced(self.client.clone(), namespace)).await
            }
            RemedyKind::VirtualMachine => {
                list_objects(Api::<VirtualMachine>::namespaced(self.client.clone(), namespace)).await
            }
        }
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        kind: RemedyKind,
        name: &str,
        finalizer: &str,
    ) -> Result<()> {
        debug!(namespace, kind = %kind, name, "Removing remedy finalizer");
        match kind {
            RemedyKind::PublicIpAddress => {
                let api = Api::<PublicIPAddress>::namespaced(self.client.clone(), namespace);
                remove_object_finalizer(api, name, finalizer).await
            }
            RemedyKind::VirtualMachine => {
                let api = Api::<VirtualMachine>::namespaced(self.client.clone(), namespace);
                remove_object_finalizer(api, name, finalizer).await
            }
        }
    }

    async fn delete_all(&self, namespace: &str, kind: RemedyKind) -> Result<()> {
        debug!(namespace, kind = %kind, "Deleting all remedy resources");
        match kind {
            RemedyKind::PublicIpAddress => {
                delete_objects(Api::<PublicIPAddress>::namespaced(self.client.clone(), namespace)).await
            }
            RemedyKind::VirtualMachine => {
                delete_objects(Api::<VirtualMachine>::namespaced(self.client.clone(), namespace)).await
            }
        }
    }
}

pub struct KubeShootClient {
    client: Client,
}

#[async_trait]
impl ShootClient for KubeShootClient {
    async fn list_load_balancer_services(&self) -> Result<Vec<LoadBalancerService>> {
        let services: Api<Service> = Api::all(self.client.clone());
        let list = services.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter(|svc| {
                svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer")
            })
            .map(|svc| LoadBalancerService {
                namespace: svc.metadata.namespace.unwrap_or_default(),
                name: svc.metadata.name.unwrap_or_default(),
                finalizers: svc.metadata.finalizers.unwrap_or_default(),
            })
            .collect())
    }

    async fn remove_service_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<()> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        remove_object_finalizer(services, name, finalizer).await
    }
}

/// Builds shoot clients from the kubeconfig gardener keeps in the seed namespace
pub struct KubeShootClientFactory {
    seed: Client,
}

impl KubeShootClientFactory {
    pub fn new(seed: Client) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl ShootClientFactory for KubeShootClientFactory {
    async fn shoot_client(&self, namespace: &str) -> Result<Arc<dyn ShootClient>> {
        let secrets: Api<Secret> = Api::namespaced(self.seed.clone(), namespace);
        let secret = secrets.get(SHOOT_ACCESS_SECRET).await?;
        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_KEY))
            .ok_or_else(|| {
                Error::internal(format!(
                    "secret {}/{} has no {}",
                    namespace, SHOOT_ACCESS_SECRET, KUBECONFIG_KEY
                ))
            })?;
        let kubeconfig = Kubeconfig::from_yaml(&String::from_utf8_lossy(&raw.0))
            .map_err(|e| Error::internal(format!("invalid shoot kubeconfig: {}", e)))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::internal(format!("invalid shoot kubeconfig: {}", e)))?;
        let client = Client::try_from(config)?;
        Ok(Arc::new(KubeShootClient { client }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalizers_per_kind() {
        assert_eq!(
            RemedyKind::PublicIpAddress.finalizer(),
            "azure.remedy.gardener.cloud/publicipaddress"
        );
        assert_eq!(
            RemedyKind::VirtualMachine.finalizer(),
            "azure.remedy.gardener.cloud/virtualmachine"
        );
        assert_eq!(RemedyKind::ALL.len(), 2);
        assert_eq!(RemedyKind::PublicIpAddress.to_string(), "PublicIPAddress");
    }
}

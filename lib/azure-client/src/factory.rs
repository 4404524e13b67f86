//! Capability traits of the Azure client factory
//!
//! Every `get` returns `Ok(None)` for resources that do not exist and every
//! `delete` treats a missing resource as success. Long-running operations are
//! awaited until they reach a terminal state.

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::ClientAuth;
use crate::cloud::CloudConfiguration;
use crate::error::Result;
use crate::models::{
    AvailabilitySet, BlobContainer, Identity, NatGateway, PublicIpAddress, ResourceGroup,
    RouteTable, SecurityGroup, StorageAccount, Subnet, Tags, VirtualNetwork,
};

#[async_trait]
pub trait ResourceGroups: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<ResourceGroup>>;
    async fn create_or_update(&self, name: &str, location: &str, tags: Tags) -> Result<ResourceGroup>;
    async fn delete(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait VirtualNetworks: Send + Sync {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<VirtualNetwork>>;
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        vnet: VirtualNetwork,
    ) -> Result<VirtualNetwork>;
    async fn delete(&self, resource_group: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait Subnets: Send + Sync {
    async fn get(&self, resource_group: &str, vnet: &str, name: &str) -> Result<Option<Subnet>>;
    async fn list(&self, resource_group: &str, vnet: &str) -> Result<Vec<Subnet>>;
    async fn create_or_update(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
        subnet: Subnet,
    ) -> Result<Subnet>;
    async fn delete(&self, resource_group: &str, vnet: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait RouteTables: Send + Sync {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<RouteTable>>;
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        table: RouteTable,
    ) -> Result<RouteTable>;
    async fn delete(&self, resource_group: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait SecurityGroups: Send + Sync {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<SecurityGroup>>;
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        group: SecurityGroup,
    ) -> Result<SecurityGroup>;
    async fn delete(&self, resource_group: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait PublicIps: Send + Sync {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<PublicIpAddress>>;
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        ip: PublicIpAddress,
    ) -> Result<PublicIpAddress>;
    async fn delete(&self, resource_group: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait NatGateways: Send + Sync {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<NatGateway>>;
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        gateway: NatGateway,
    ) -> Result<NatGateway>;
    async fn delete(&self, resource_group: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait AvailabilitySets: Send + Sync {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<AvailabilitySet>>;
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        set: AvailabilitySet,
    ) -> Result<AvailabilitySet>;
    async fn delete(&self, resource_group: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait ManagedIdentities: Send + Sync {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<Identity>>;
}

#[async_trait]
pub trait StorageAccounts: Send + Sync {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<StorageAccount>>;
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        account: StorageAccount,
    ) -> Result<StorageAccount>;
    async fn delete(&self, resource_group: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait BlobContainers: Send + Sync {
    async fn get(
        &self,
        resource_group: &str,
        account: &str,
        name: &str,
    ) -> Result<Option<BlobContainer>>;
    async fn create_or_update(
        &self,
        resource_group: &str,
        account: &str,
        name: &str,
        container: BlobContainer,
    ) -> Result<BlobContainer>;
    async fn delete(&self, resource_group: &str, account: &str, name: &str) -> Result<()>;
}

/// Hands out one client per capability, all bound to the same subscription
pub trait Factory: Send + Sync {
    fn subscription_id(&self) -> &str;
    fn resource_groups(&self) -> Arc<dyn ResourceGroups>;
    fn virtual_networks(&self) -> Arc<dyn VirtualNetworks>;
    fn subnets(&self) -> Arc<dyn Subnets>;
    fn route_tables(&self) -> Arc<dyn RouteTables>;
    fn security_groups(&self) -> Arc<dyn SecurityGroups>;
    fn public_ips(&self) -> Arc<dyn PublicIps>;
    fn nat_gateways(&self) -> Arc<dyn NatGateways>;
    fn availability_sets(&self) -> Arc<dyn AvailabilitySets>;
    fn managed_identities(&self) -> Arc<dyn ManagedIdentities>;
    fn storage_accounts(&self) -> Arc<dyn StorageAccounts>;
    fn blob_containers(&self) -> Arc<dyn BlobContainers>;
}

/// Builds a factory from credentials and a cloud instance
pub trait FactoryProvider: Send + Sync {
    fn factory(&self, auth: ClientAuth, cloud: CloudConfiguration) -> Result<Arc<dyn Factory>>;
}

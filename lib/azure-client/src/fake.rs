//! In-memory Azure for tests
//!
//! [`FakeAzure`] implements the whole factory against maps guarded by a mutex.
//! It enforces the reference rules ARM enforces on delete (a NAT gateway bound
//! to a subnet cannot be deleted, a public IP attached to a NAT gateway cannot
//! be deleted, ...), cascades resource group and VNet deletion, and supports
//! injecting failures per operation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::auth::ClientAuth;
use crate::cloud::CloudConfiguration;
use crate::error::{AzureError, Result};
use crate::factory::{
    AvailabilitySets, BlobContainers, Factory, FactoryProvider, ManagedIdentities, NatGateways,
    PublicIps, ResourceGroups, RouteTables, SecurityGroups, StorageAccounts, Subnets,
    VirtualNetworks,
};
use crate::models::{
    self, same_id, AddressSpace, AvailabilitySet, BlobContainer, Identity, IdentityProperties,
    NatGateway, PublicIpAddress, PublicIpAddressProperties, ResourceGroup, RouteTable,
    SecurityGroup, Sku, StorageAccount, SubResource, Subnet, Tags, VirtualNetwork,
    VirtualNetworkProperties,
};

/// Subscription every fake resource ID lives in
pub const FAKE_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

const SUCCEEDED: &str = "Succeeded";

type Key = (String, String);
type Key3 = (String, String, String);

fn key(resource_group: &str, name: &str) -> Key {
    (resource_group.to_ascii_lowercase(), name.to_ascii_lowercase())
}

fn key3(resource_group: &str, parent: &str, name: &str) -> Key3 {
    (
        resource_group.to_ascii_lowercase(),
        parent.to_ascii_lowercase(),
        name.to_ascii_lowercase(),
    )
}

fn not_found(kind: &str, name: &str) -> AzureError {
    AzureError::response(404, "ResourceNotFound", format!("{} {} was not found", kind, name))
}

fn in_use(code: &str, message: String) -> AzureError {
    AzureError::response(400, code, message)
}

fn id_matches(id: &Option<String>, other: &str) -> bool {
    id.as_deref().map(|id| same_id(id, other)).unwrap_or(false)
}

#[derive(Clone, Debug)]
struct Failure {
    operation: String,
    status: u16,
    code: String,
    /// None fails forever
    remaining: Option<u32>,
}

#[derive(Default)]
struct FakeState {
    resource_groups: BTreeMap<String, ResourceGroup>,
    vnets: BTreeMap<Key, VirtualNetwork>,
    subnets: BTreeMap<Key3, Subnet>,
    route_tables: BTreeMap<Key, RouteTable>,
    security_groups: BTreeMap<Key, SecurityGroup>,
    public_ips: BTreeMap<Key, PublicIpAddress>,
    nat_gateways: BTreeMap<Key, NatGateway>,
    availability_sets: BTreeMap<Key, AvailabilitySet>,
    identities: BTreeMap<Key, Identity>,
    storage_accounts: BTreeMap<Key, StorageAccount>,
    blob_containers: BTreeMap<Key3, BlobContainer>,
    failures: Vec<Failure>,
    calls: Vec<String>,
    credentials_rejected: bool,
    last_auth: Option<ClientAuth>,
    next_ip: u32,
}

impl FakeState {
    fn check(&mut self, operation: &str, target: &str) -> Result<()> {
        self.calls.push(format!("{} {}", operation, target));
        if self.credentials_rejected {
            return Err(AzureError::response(
                401,
                "InvalidAuthenticationToken",
                "the access token is invalid",
            ));
        }
        let position = self.failures.iter().position(|f| f.operation == operation);
        if let Some(index) = position {
            let failure = self.failures[index].clone();
            if let Some(remaining) = failure.remaining {
                if remaining <= 1 {
                    self.failures.remove(index);
                } else {
                    self.failures[index].remaining = Some(remaining - 1);
                }
            }
            return Err(AzureError::response(
                failure.status,
                failure.code,
                format!("injected failure for {}", operation),
            ));
        }
        Ok(())
    }

    fn require_group(&self, resource_group: &str) -> Result<()> {
        if self
            .resource_groups
            .contains_key(&resource_group.to_ascii_lowercase())
        {
            Ok(())
        } else {
            Err(AzureError::response(
                404,
                "ResourceGroupNotFound",
                format!("resource group {} could not be found", resource_group),
            ))
        }
    }

    fn unbind_subnet(&mut self, subnet_id: &str) {
        for nat in self.nat_gateways.values_mut() {
            nat.properties.subnets.retain(|s| !same_id(&s.id, subnet_id));
        }
    }

    fn remove_subnet(&mut self, subnet_key: &Key3) {
        if let Some(subnet) = self.subnets.remove(subnet_key) {
            if let Some(id) = subnet.id {
                self.unbind_subnet(&id);
            }
        }
    }

    fn subnet_references(&self, id: &str, pick: fn(&Subnet) -> Option<&SubResource>) -> bool {
        self.subnets
            .values()
            .any(|s| pick(s).map(|r| same_id(&r.id, id)).unwrap_or(false))
    }
}

/// In-memory implementation of [`Factory`] and [`FactoryProvider`]
#[derive(Clone, Default)]
pub struct FakeAzure {
    state: Arc<Mutex<FakeState>>,
}

impl FakeAzure {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn id(resource_group: &str, resource_type: &str, name: &str) -> String {
        models::resource_id(FAKE_SUBSCRIPTION, resource_group, resource_type, name)
    }

    /// Fail the next call of `operation` (e.g. `"nat_gateways.delete"`)
    pub fn fail_once(&self, operation: &str, status: u16, code: &str) {
        self.fail_times(operation, status, code, Some(1));
    }

    /// Fail every call of `operation`
    pub fn fail_always(&self, operation: &str, status: u16, code: &str) {
        self.fail_times(operation, status, code, None);
    }

    fn fail_times(&self, operation: &str, status: u16, code: &str, remaining: Option<u32>) {
        self.lock().failures.push(Failure {
            operation: operation.to_string(),
            status,
            code: code.to_string(),
            remaining,
        });
    }

    /// Answer every call with 401
    pub fn reject_credentials(&self) {
        self.lock().credentials_rejected = true;
    }

    /// Every call so far as `"<operation> <target>"`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of mutating calls so far
    pub fn writes(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.contains(".create_or_update ") || c.contains(".delete "))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Credentials passed to the last [`FactoryProvider::factory`] call
    pub fn last_auth(&self) -> Option<ClientAuth> {
        self.lock().last_auth.clone()
    }

    pub fn add_resource_group(&self, name: &str, location: &str) {
        let group = ResourceGroup {
            id: Some(models::resource_group_id(FAKE_SUBSCRIPTION, name)),
            name: Some(name.to_string()),
            location: location.to_string(),
            tags: Tags::new(),
        };
        self.lock()
            .resource_groups
            .insert(name.to_ascii_lowercase(), group);
    }

    pub fn add_virtual_network(&self, resource_group: &str, name: &str, cidr: &str, location: &str) {
        let vnet = VirtualNetwork {
            id: Some(Self::id(resource_group, models::VIRTUAL_NETWORK_TYPE, name)),
            name: Some(name.to_string()),
            location: location.to_string(),
            tags: Tags::new(),
            properties: VirtualNetworkProperties {
                address_space: AddressSpace {
                    address_prefixes: vec![cidr.to_string()],
                },
                provisioning_state: Some(SUCCEEDED.to_string()),
                ..Default::default()
            },
        };
        self.lock().vnets.insert(key(resource_group, name), vnet);
    }

    pub fn add_identity(&self, resource_group: &str, name: &str, client_id: &str) {
        let identity = Identity {
            id: Some(Self::id(resource_group, models::IDENTITY_TYPE, name)),
            name: Some(name.to_string()),
            location: String::new(),
            properties: IdentityProperties {
                client_id: Some(client_id.to_string()),
                principal_id: Some(format!("principal-{}", client_id)),
                tenant_id: None,
            },
        };
        self.lock().identities.insert(key(resource_group, name), identity);
    }

    /// A user-provided public IP (Standard, static, IPv4)
    pub fn add_public_ip(&self, resource_group: &str, name: &str, location: &str, zones: &[&str]) {
        let mut state = self.lock();
        state.next_ip += 1;
        let ip = PublicIpAddress {
            id: Some(Self::id(resource_group, models::PUBLIC_IP_TYPE, name)),
            name: Some(name.to_string()),
            location: location.to_string(),
            tags: Tags::new(),
            sku: Some(Sku::standard()),
            zones: zones.iter().map(|z| z.to_string()).collect(),
            properties: PublicIpAddressProperties {
                allocation_method: Some("Static".to_string()),
                address_version: Some("IPv4".to_string()),
                ip_address: Some(format!("20.0.0.{}", state.next_ip)),
                nat_gateway: None,
                provisioning_state: Some(SUCCEEDED.to_string()),
            },
        };
        state.public_ips.insert(key(resource_group, name), ip);
    }

    pub fn resource_group(&self, name: &str) -> Option<ResourceGroup> {
        self.lock()
            .resource_groups
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    pub fn virtual_network(&self, resource_group: &str, name: &str) -> Option<VirtualNetwork> {
        self.lock().vnets.get(&key(resource_group, name)).cloned()
    }

    pub fn subnet(&self, resource_group: &str, vnet: &str, name: &str) -> Option<Subnet> {
        self.lock().subnets.get(&key3(resource_group, vnet, name)).cloned()
    }

    /// Names of the subnets in a VNet
    pub fn subnet_names(&self, resource_group: &str, vnet: &str) -> Vec<String> {
        let (rg, vnet) = key(resource_group, vnet);
        self.lock()
            .subnets
            .iter()
            .filter(|((r, v, _), _)| *r == rg && *v == vnet)
            .filter_map(|(_, s)| s.name.clone())
            .collect()
    }

    pub fn route_table(&self, resource_group: &str, name: &str) -> Option<RouteTable> {
        self.lock().route_tables.get(&key(resource_group, name)).cloned()
    }

    pub fn security_group(&self, resource_group: &str, name: &str) -> Option<SecurityGroup> {
        self.lock().security_groups.get(&key(resource_group, name)).cloned()
    }

    pub fn public_ip(&self, resource_group: &str, name: &str) -> Option<PublicIpAddress> {
        self.lock().public_ips.get(&key(resource_group, name)).cloned()
    }

    pub fn nat_gateway(&self, resource_group: &str, name: &str) -> Option<NatGateway> {
        self.lock().nat_gateways.get(&key(resource_group, name)).cloned()
    }

    /// Names of the NAT gateways in a resource group
    pub fn nat_gateway_names(&self, resource_group: &str) -> Vec<String> {
        let rg = resource_group.to_ascii_lowercase();
        self.lock()
            .nat_gateways
            .iter()
            .filter(|((r, _), _)| *r == rg)
            .filter_map(|(_, n)| n.name.clone())
            .collect()
    }

    /// Names of the public IPs in a resource group
    pub fn public_ip_names(&self, resource_group: &str) -> Vec<String> {
        let rg = resource_group.to_ascii_lowercase();
        self.lock()
            .public_ips
            .iter()
            .filter(|((r, _), _)| *r == rg)
            .filter_map(|(_, n)| n.name.clone())
            .collect()
    }

    pub fn availability_set(&self, resource_group: &str, name: &str) -> Option<AvailabilitySet> {
        self.lock().availability_sets.get(&key(resource_group, name)).cloned()
    }

    pub fn identity(&self, resource_group: &str, name: &str) -> Option<Identity> {
        self.lock().identities.get(&key(resource_group, name)).cloned()
    }
}

#[async_trait]
impl ResourceGroups for FakeAzure {
    async fn get(&self, name: &str) -> Result<Option<ResourceGroup>> {
        let mut state = self.lock();
        state.check("resource_groups.get", name)?;
        Ok(state.resource_groups.get(&name.to_ascii_lowercase()).cloned())
    }

    async fn create_or_update(&self, name: &str, location: &str, tags: Tags) -> Result<ResourceGroup> {
        let mut state = self.lock();
        state.check("resource_groups.create_or_update", name)?;
        if let Some(existing) = state.resource_groups.get(&name.to_ascii_lowercase()) {
            if !existing.location.eq_ignore_ascii_case(location) {
                return Err(AzureError::response(
                    409,
                    "InvalidResourceGroupLocation",
                    format!(
                        "resource group {} already exists in location {}",
                        name, existing.location
                    ),
                ));
            }
        }
        let group = ResourceGroup {
            id: Some(models::resource_group_id(FAKE_SUBSCRIPTION, name)),
            name: Some(name.to_string()),
            location: location.to_string(),
            tags,
        };
        state
            .resource_groups
            .insert(name.to_ascii_lowercase(), group.clone());
        Ok(group)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("resource_groups.delete", name)?;
        let rg = name.to_ascii_lowercase();
        if state.resource_groups.remove(&rg).is_none() {
            return Ok(());
        }
        let subnet_keys: Vec<Key3> = state
            .subnets
            .keys()
            .filter(|(r, _, _)| *r == rg)
            .cloned()
            .collect();
        for subnet_key in &subnet_keys {
            state.remove_subnet(subnet_key);
        }
        state.vnets.retain(|(r, _), _| *r != rg);
        state.route_tables.retain(|(r, _), _| *r != rg);
        state.security_groups.retain(|(r, _), _| *r != rg);
        state.public_ips.retain(|(r, _), _| *r != rg);
        state.nat_gateways.retain(|(r, _), _| *r != rg);
        state.availability_sets.retain(|(r, _), _| *r != rg);
        state.identities.retain(|(r, _), _| *r != rg);
        state.storage_accounts.retain(|(r, _), _| *r != rg);
        state.blob_containers.retain(|(r, _, _), _| *r != rg);
        Ok(())
    }
}

#[async_trait]
impl VirtualNetworks for FakeAzure {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<VirtualNetwork>> {
        let mut state = self.lock();
        state.check("virtual_networks.get", name)?;
        let (rg, vnet) = key(resource_group, name);
        let subnets: Vec<Subnet> = state
            .subnets
            .iter()
            .filter(|((r, v, _), _)| *r == rg && *v == vnet)
            .map(|(_, s)| s.clone())
            .collect();
        Ok(state.vnets.get(&(rg, vnet)).cloned().map(|mut v| {
            v.properties.subnets = subnets;
            v
        }))
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        mut vnet: VirtualNetwork,
    ) -> Result<VirtualNetwork> {
        let mut state = self.lock();
        state.check("virtual_networks.create_or_update", name)?;
        state.require_group(resource_group)?;
        vnet.id = Some(Self::id(resource_group, models::VIRTUAL_NETWORK_TYPE, name));
        vnet.name = Some(name.to_string());
        vnet.properties.subnets.clear();
        vnet.properties.provisioning_state = Some(SUCCEEDED.to_string());
        state.vnets.insert(key(resource_group, name), vnet.clone());
        Ok(vnet)
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("virtual_networks.delete", name)?;
        let (rg, vnet) = key(resource_group, name);
        let subnet_keys: Vec<Key3> = state
            .subnets
            .keys()
            .filter(|(r, v, _)| *r == rg && *v == vnet)
            .cloned()
            .collect();
        for subnet_key in &subnet_keys {
            state.remove_subnet(subnet_key);
        }
        state.vnets.remove(&(rg, vnet));
        Ok(())
    }
}

#[async_trait]
impl Subnets for FakeAzure {
    async fn get(&self, resource_group: &str, vnet: &str, name: &str) -> Result<Option<Subnet>> {
        let mut state = self.lock();
        state.check("subnets.get", name)?;
        Ok(state.subnets.get(&key3(resource_group, vnet, name)).cloned())
    }

    async fn list(&self, resource_group: &str, vnet: &str) -> Result<Vec<Subnet>> {
        let mut state = self.lock();
        state.check("subnets.list", vnet)?;
        let (rg, vnet) = key(resource_group, vnet);
        if !state.vnets.contains_key(&(rg.clone(), vnet.clone())) {
            return Err(not_found("virtual network", &vnet));
        }
        Ok(state
            .subnets
            .iter()
            .filter(|((r, v, _), _)| *r == rg && *v == vnet)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        vnet: &str,
        name: &str,
        mut subnet: Subnet,
    ) -> Result<Subnet> {
        let mut state = self.lock();
        state.check("subnets.create_or_update", name)?;
        if !state.vnets.contains_key(&key(resource_group, vnet)) {
            return Err(not_found("virtual network", vnet));
        }

        let props = &subnet.properties;
        let dangling = |id: &str, exists: bool| {
            if exists {
                Ok(())
            } else {
                Err(AzureError::response(
                    400,
                    "InvalidResourceReference",
                    format!("resource {} referenced by subnet {} was not found", id, name),
                ))
            }
        };
        if let Some(nat) = &props.nat_gateway {
            dangling(&nat.id, state.nat_gateways.values().any(|n| id_matches(&n.id, &nat.id)))?;
        }
        if let Some(table) = &props.route_table {
            dangling(&table.id, state.route_tables.values().any(|t| id_matches(&t.id, &table.id)))?;
        }
        if let Some(group) = &props.network_security_group {
            dangling(&group.id, state.security_groups.values().any(|g| id_matches(&g.id, &group.id)))?;
        }

        let id = models::subnet_id(FAKE_SUBSCRIPTION, resource_group, vnet, name);
        subnet.id = Some(id.clone());
        subnet.name = Some(name.to_string());
        subnet.properties.provisioning_state = Some(SUCCEEDED.to_string());

        state.unbind_subnet(&id);
        if let Some(nat_ref) = subnet.properties.nat_gateway.clone() {
            if let Some(nat) = state
                .nat_gateways
                .values_mut()
                .find(|n| id_matches(&n.id, &nat_ref.id))
            {
                nat.properties.subnets.push(SubResource::new(id.clone()));
            }
        }
        state
            .subnets
            .insert(key3(resource_group, vnet, name), subnet.clone());
        Ok(subnet)
    }

    async fn delete(&self, resource_group: &str, vnet: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("subnets.delete", name)?;
        state.remove_subnet(&key3(resource_group, vnet, name));
        Ok(())
    }
}

#[async_trait]
impl RouteTables for FakeAzure {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<RouteTable>> {
        let mut state = self.lock();
        state.check("route_tables.get", name)?;
        Ok(state.route_tables.get(&key(resource_group, name)).cloned())
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        mut table: RouteTable,
    ) -> Result<RouteTable> {
        let mut state = self.lock();
        state.check("route_tables.create_or_update", name)?;
        state.require_group(resource_group)?;
        table.id = Some(Self::id(resource_group, models::ROUTE_TABLE_TYPE, name));
        table.name = Some(name.to_string());
        state.route_tables.insert(key(resource_group, name), table.clone());
        Ok(table)
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("route_tables.delete", name)?;
        let id = Self::id(resource_group, models::ROUTE_TABLE_TYPE, name);
        if state.subnet_references(&id, |s| s.properties.route_table.as_ref()) {
            return Err(in_use(
                "InUseRouteTableCannotBeDeleted",
                format!("route table {} is in use by a subnet", name),
            ));
        }
        state.route_tables.remove(&key(resource_group, name));
        Ok(())
    }
}

#[async_trait]
impl SecurityGroups for FakeAzure {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<SecurityGroup>> {
        let mut state = self.lock();
        state.check("security_groups.get", name)?;
        Ok(state.security_groups.get(&key(resource_group, name)).cloned())
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        mut group: SecurityGroup,
    ) -> Result<SecurityGroup> {
        let mut state = self.lock();
        state.check("security_groups.create_or_update", name)?;
        state.require_group(resource_group)?;
        group.id = Some(Self::id(resource_group, models::SECURITY_GROUP_TYPE, name));
        group.name = Some(name.to_string());
        state.security_groups.insert(key(resource_group, name), group.clone());
        Ok(group)
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("security_groups.delete", name)?;
        let id = Self::id(resource_group, models::SECURITY_GROUP_TYPE, name);
        if state.subnet_references(&id, |s| s.properties.network_security_group.as_ref()) {
            return Err(in_use(
                "InUseNetworkSecurityGroupCannotBeDeleted",
                format!("network security group {} is in use by a subnet", name),
            ));
        }
        state.security_groups.remove(&key(resource_group, name));
        Ok(())
    }
}

#[async_trait]
impl PublicIps for FakeAzure {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<PublicIpAddress>> {
        let mut state = self.lock();
        state.check("public_ips.get", name)?;
        Ok(state.public_ips.get(&key(resource_group, name)).cloned())
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        mut ip: PublicIpAddress,
    ) -> Result<PublicIpAddress> {
        let mut state = self.lock();
        state.check("public_ips.create_or_update", name)?;
        state.require_group(resource_group)?;
        let existing = state.public_ips.get(&key(resource_group, name)).cloned();
        ip.id = Some(Self::id(resource_group, models::PUBLIC_IP_TYPE, name));
        ip.name = Some(name.to_string());
        ip.properties.provisioning_state = Some(SUCCEEDED.to_string());
        match existing {
            Some(existing) => {
                ip.properties.ip_address = existing.properties.ip_address;
                ip.properties.nat_gateway = existing.properties.nat_gateway;
            }
            None => {
                state.next_ip += 1;
                ip.properties.ip_address = Some(format!("20.0.0.{}", state.next_ip));
            }
        }
        state.public_ips.insert(key(resource_group, name), ip.clone());
        Ok(ip)
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("public_ips.delete", name)?;
        let ip_key = key(resource_group, name);
        if let Some(ip) = state.public_ips.get(&ip_key) {
            if ip.properties.nat_gateway.is_some() {
                return Err(in_use(
                    "PublicIPAddressInUse",
                    format!("public IP {} is attached to a NAT gateway", name),
                ));
            }
        }
        state.public_ips.remove(&ip_key);
        Ok(())
    }
}

#[async_trait]
impl NatGateways for FakeAzure {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<NatGateway>> {
        let mut state = self.lock();
        state.check("nat_gateways.get", name)?;
        Ok(state.nat_gateways.get(&key(resource_group, name)).cloned())
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        mut gateway: NatGateway,
    ) -> Result<NatGateway> {
        let mut state = self.lock();
        state.check("nat_gateways.create_or_update", name)?;
        state.require_group(resource_group)?;

        for ip_ref in &gateway.properties.public_ip_addresses {
            let ip = state
                .public_ips
                .values()
                .find(|ip| id_matches(&ip.id, &ip_ref.id))
                .ok_or_else(|| {
                    AzureError::response(
                        400,
                        "InvalidResourceReference",
                        format!("public IP {} referenced by NAT gateway {} was not found", ip_ref.id, name),
                    )
                })?;
            if !ip.is_nat_compatible() {
                return Err(AzureError::response(
                    400,
                    "NatGatewayCannotUseBasicPublicIp",
                    format!("public IP {} is not a standard IPv4 address", ip_ref.id),
                ));
            }
        }

        let id = Self::id(resource_group, models::NAT_GATEWAY_TYPE, name);
        let nat_key = key(resource_group, name);
        gateway.id = Some(id.clone());
        gateway.name = Some(name.to_string());
        gateway.properties.provisioning_state = Some(SUCCEEDED.to_string());
        gateway.properties.subnets = state
            .nat_gateways
            .get(&nat_key)
            .map(|n| n.properties.subnets.clone())
            .unwrap_or_default();

        for ip in state.public_ips.values_mut() {
            let attached = gateway
                .properties
                .public_ip_addresses
                .iter()
                .any(|r| id_matches(&ip.id, &r.id));
            let bound_here = ip
                .properties
                .nat_gateway
                .as_ref()
                .map(|n| same_id(&n.id, &id))
                .unwrap_or(false);
            if attached {
                ip.properties.nat_gateway = Some(SubResource::new(id.clone()));
            } else if bound_here {
                ip.properties.nat_gateway = None;
            }
        }
        state.nat_gateways.insert(nat_key, gateway.clone());
        Ok(gateway)
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("nat_gateways.delete", name)?;
        let nat_key = key(resource_group, name);
        let Some(gateway) = state.nat_gateways.get(&nat_key) else {
            return Ok(());
        };
        if !gateway.properties.subnets.is_empty() {
            return Err(in_use(
                "InUseNatGatewayCannotBeDeleted",
                format!("NAT gateway {} is in use by a subnet", name),
            ));
        }
        let id = gateway.id.clone().unwrap_or_default();
        for ip in state.public_ips.values_mut() {
            if ip
                .properties
                .nat_gateway
                .as_ref()
                .map(|n| same_id(&n.id, &id))
                .unwrap_or(false)
            {
                ip.properties.nat_gateway = None;
            }
        }
        state.nat_gateways.remove(&nat_key);
        Ok(())
    }
}

#[async_trait]
impl AvailabilitySets for FakeAzure {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<AvailabilitySet>> {
        let mut state = self.lock();
        state.check("availability_sets.get", name)?;
        Ok(state.availability_sets.get(&key(resource_group, name)).cloned())
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        mut set: AvailabilitySet,
    ) -> Result<AvailabilitySet> {
        let mut state = self.lock();
        state.check("availability_sets.create_or_update", name)?;
        state.require_group(resource_group)?;
        set.id = Some(Self::id(resource_group, models::AVAILABILITY_SET_TYPE, name));
        set.name = Some(name.to_string());
        state.availability_sets.insert(key(resource_group, name), set.clone());
        Ok(set)
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("availability_sets.delete", name)?;
        state.availability_sets.remove(&key(resource_group, name));
        Ok(())
    }
}

#[async_trait]
impl ManagedIdentities for FakeAzure {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<Identity>> {
        let mut state = self.lock();
        state.check("managed_identities.get", name)?;
        Ok(state.identities.get(&key(resource_group, name)).cloned())
    }
}

#[async_trait]
impl StorageAccounts for FakeAzure {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<StorageAccount>> {
        let mut state = self.lock();
        state.check("storage_accounts.get", name)?;
        Ok(state.storage_accounts.get(&key(resource_group, name)).cloned())
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        mut account: StorageAccount,
    ) -> Result<StorageAccount> {
        let mut state = self.lock();
        state.check("storage_accounts.create_or_update", name)?;
        state.require_group(resource_group)?;
        account.id = Some(Self::id(resource_group, models::STORAGE_ACCOUNT_TYPE, name));
        account.name = Some(name.to_string());
        state.storage_accounts.insert(key(resource_group, name), account.clone());
        Ok(account)
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("storage_accounts.delete", name)?;
        let (rg, account) = key(resource_group, name);
        state
            .blob_containers
            .retain(|(r, a, _), _| !(*r == rg && *a == account));
        state.storage_accounts.remove(&(rg, account));
        Ok(())
    }
}

#[async_trait]
impl BlobContainers for FakeAzure {
    async fn get(
        &self,
        resource_group: &str,
        account: &str,
        name: &str,
    ) -> Result<Option<BlobContainer>> {
        let mut state = self.lock();
        state.check("blob_containers.get", name)?;
        Ok(state.blob_containers.get(&key3(resource_group, account, name)).cloned())
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        account: &str,
        name: &str,
        mut container: BlobContainer,
    ) -> Result<BlobContainer> {
        let mut state = self.lock();
        state.check("blob_containers.create_or_update", name)?;
        if !state.storage_accounts.contains_key(&key(resource_group, account)) {
            return Err(not_found("storage account", account));
        }
        container.id = Some(format!(
            "{}/blobServices/default/containers/{}",
            Self::id(resource_group, models::STORAGE_ACCOUNT_TYPE, account),
            name
        ));
        container.name = Some(name.to_string());
        state
            .blob_containers
            .insert(key3(resource_group, account, name), container.clone());
        Ok(container)
    }

    async fn delete(&self, resource_group: &str, account: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check("blob_containers.delete", name)?;
        state.blob_containers.remove(&key3(resource_group, account, name));
        Ok(())
    }
}

impl Factory for FakeAzure {
    fn subscription_id(&self) -> &str {
        FAKE_SUBSCRIPTION
    }

    fn resource_groups(&self) -> Arc<dyn ResourceGroups> {
        Arc::new(self.clone())
    }

    fn virtual_networks(&self) -> Arc<dyn VirtualNetworks> {
        Arc::new(self.clone())
    }

    fn subnets(&self) -> Arc<dyn Subnets> {
        Arc::new(self.clone())
    }

    fn route_tables(&self) -> Arc<dyn RouteTables> {
        Arc::new(self.clone())
    }

    fn security_groups(&self) -> Arc<dyn SecurityGroups> {
        Arc::new(self.clone())
    }

    fn public_ips(&self) -> Arc<dyn PublicIps> {
        Arc::new(self.clone())
    }

    fn nat_gateways(&self) -> Arc<dyn NatGateways> {
        Arc::new(self.clone())
    }

    fn availability_sets(&self) -> Arc<dyn AvailabilitySets> {
        Arc::new(self.clone())
    }

    fn managed_identities(&self) -> Arc<dyn ManagedIdentities> {
        Arc::new(self.clone())
    }

    fn storage_accounts(&self) -> Arc<dyn StorageAccounts> {
        Arc::new(self.clone())
    }

    fn blob_containers(&self) -> Arc<dyn BlobContainers> {
        Arc::new(self.clone())
    }
}

impl FactoryProvider for FakeAzure {
    fn factory(&self, auth: ClientAuth, _cloud: CloudConfiguration) -> Result<Arc<dyn Factory>> {
        self.lock().last_auth = Some(auth);
        Ok(Arc::new(self.clone()))
    }
}

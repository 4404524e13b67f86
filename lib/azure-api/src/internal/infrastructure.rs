pub use crate::v1alpha1::infrastructure::{NetworkLayout, OutboundAccessType, Purpose};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InfrastructureConfig {
    pub resource_group: Option<ResourceGroup>,
    pub networks: NetworkConfig,
    pub identity: Option<IdentityConfig>,
    pub zoned: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceGroup {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkConfig {
    pub vnet: VNet,
    pub workers: Option<String>,
    pub nat_gateway: Option<NatGatewayConfig>,
    pub service_endpoints: Vec<String>,
    pub zones: Vec<Zone>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VNet {
    pub name: Option<String>,
    pub resource_group: Option<String>,
    pub cidr: Option<String>,
    pub ddos_protection_plan_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Zone {
    pub name: i32,
    pub cidr: String,
    pub service_endpoints: Vec<String>,
    pub nat_gateway: Option<ZonedNatGatewayConfig>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NatGatewayConfig {
    pub enabled: bool,
    pub idle_connection_timeout_minutes: Option<i32>,
    pub zone: Option<i32>,
    pub ip_addresses: Vec<PublicIpReference>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ZonedNatGatewayConfig {
    pub enabled: bool,
    pub idle_connection_timeout_minutes: Option<i32>,
    pub ip_addresses: Vec<PublicIpReference>,
}

/// User-provided public IP. `zone` is only known for the single-subnet NAT gateway.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublicIpReference {
    pub name: String,
    pub resource_group: String,
    pub zone: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdentityConfig {
    pub name: String,
    pub resource_group: String,
    pub acr_access: Option<bool>,
}

impl VNet {
    /// A VNet referenced by name and resource group is owned by someone else
    pub fn is_foreign(&self) -> bool {
        self.name.is_some() && self.resource_group.is_some()
    }
}

impl InfrastructureConfig {
    pub fn layout(&self) -> NetworkLayout {
        if self.networks.zones.is_empty() {
            NetworkLayout::SingleSubnet
        } else {
            NetworkLayout::MultipleSubnet
        }
    }

    /// Whether the single worker subnet gets a NAT gateway
    pub fn single_subnet_nat_enabled(&self) -> bool {
        self.networks.zones.is_empty()
            && self
                .networks
                .nat_gateway
                .as_ref()
                .map(|n| n.enabled)
                .unwrap_or(false)
    }

    /// Zoned as declared, or forced by a single-subnet NAT gateway
    pub fn effective_zoned(&self) -> bool {
        self.zoned || self.single_subnet_nat_enabled()
    }
}

impl Zone {
    pub fn nat_enabled(&self) -> bool {
        self.nat_gateway.as_ref().map(|n| n.enabled).unwrap_or(false)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InfrastructureStatus {
    pub networks: NetworkStatus,
    pub resource_group: ResourceGroup,
    pub availability_sets: Vec<AvailabilitySet>,
    pub route_tables: Vec<RouteTable>,
    pub security_groups: Vec<SecurityGroup>,
    pub identity: Option<IdentityStatus>,
    pub zoned: bool,
    pub nat_gateway_public_ip_migrated: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkStatus {
    pub vnet: VNetStatus,
    pub subnets: Vec<Subnet>,
    pub layout: NetworkLayout,
    pub outbound_access_type: Option<OutboundAccessType>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VNetStatus {
    pub name: String,
    pub resource_group: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Subnet {
    pub name: String,
    pub purpose: Purpose,
    pub zone: Option<String>,
    pub migrated: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AvailabilitySet {
    pub purpose: Purpose,
    pub id: String,
    pub name: String,
    pub count_fault_domains: Option<i32>,
    pub count_update_domains: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteTable {
    pub purpose: Purpose,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecurityGroup {
    pub purpose: Purpose,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdentityStatus {
    pub id: String,
    pub client_id: String,
    pub acr_access: bool,
}

impl InfrastructureStatus {
    /// Names of the subnets used by worker nodes
    pub fn node_subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.networks
            .subnets
            .iter()
            .filter(|s| s.purpose == Purpose::Nodes)
    }
}

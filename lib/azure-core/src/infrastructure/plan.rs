//! Names and desired layout of the Azure resources of one shoot
//!
//! Everything the flow creates is named after the shoot's seed namespace.
//! Reconcile, delete and status computation all read the same plan.

use azure_api::internal::infrastructure::{
    InfrastructureConfig, NetworkLayout, PublicIpReference,
};

/// Route table shared by all worker subnets
pub const ROUTE_TABLE_NAME: &str = "worker_route_table";

/// `base` for index 0, `base-z<index>` otherwise
pub fn indexed_name(base: &str, index: i32) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{}-z{}", base, index)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubnetPlan {
    pub name: String,
    pub cidr: String,
    /// Set in the multiple-subnet layout
    pub zone: Option<i32>,
    pub service_endpoints: Vec<String>,
    /// Name of the NAT gateway bound to the subnet
    pub nat_gateway: Option<String>,
    /// Inherited the subnet of a former single-subnet layout
    pub migrated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NatGatewayPlan {
    pub name: String,
    pub zone: Option<i32>,
    pub idle_timeout_minutes: Option<i32>,
    /// Public IPs owned by the user
    pub user_ips: Vec<PublicIpReference>,
    /// Public IP created for the gateway when the user provides none
    pub managed_ip: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AvailabilitySetPlan {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InfrastructurePlan {
    pub namespace: String,
    pub resource_group: String,
    /// The resource group is owned by the user
    pub resource_group_is_foreign: bool,
    pub vnet_name: String,
    pub vnet_resource_group: String,
    pub vnet_is_foreign: bool,
    pub route_table: String,
    pub security_group: String,
    pub nodes_subnet_base: String,
    pub subnets: Vec<SubnetPlan>,
    pub nat_gateways: Vec<NatGatewayPlan>,
    pub availability_set: Option<AvailabilitySetPlan>,
    pub layout: NetworkLayout,
    pub zoned: bool,
}

impl InfrastructurePlan {
    /// `migrated_zone` names the zone that keeps the un-suffixed subnet and NAT
    /// gateway names of a former single-subnet layout.
    pub fn new(
        namespace: &str,
        config: &InfrastructureConfig,
        vmo: bool,
        migrated_zone: Option<i32>,
    ) -> Self {
        let resource_group = config
            .resource_group
            .as_ref()
            .map(|rg| rg.name.clone())
            .unwrap_or_else(|| namespace.to_string());

        let vnet = &config.networks.vnet;
        let (vnet_name, vnet_resource_group) = match (&vnet.name, &vnet.resource_group) {
            (Some(name), Some(group)) => (name.clone(), group.clone()),
            _ => (namespace.to_string(), resource_group.clone()),
        };

        let nodes_subnet_base = format!("{}-nodes", namespace);
        let nat_base = format!("{}-nat-gateway", namespace);
        let zoned = config.effective_zoned();

        let mut subnets = Vec::new();
        let mut nat_gateways = Vec::new();
        match config.layout() {
            NetworkLayout::SingleSubnet => {
                let nat = config.networks.nat_gateway.as_ref().filter(|n| n.enabled);
                if let Some(nat) = nat {
                    nat_gateways.push(NatGatewayPlan::new(
                        nat_base.clone(),
                        nat.zone,
                        nat.idle_connection_timeout_minutes,
                        &nat.ip_addresses,
                    ));
                }
                subnets.push(SubnetPlan {
                    name: nodes_subnet_base.clone(),
                    cidr: config.networks.workers.clone().unwrap_or_default(),
                    zone: None,
                    service_endpoints: config.networks.service_endpoints.clone(),
                    nat_gateway: nat.map(|_| nat_base.clone()),
                    migrated: false,
                });
            }
            NetworkLayout::MultipleSubnet => {
                for zone in &config.networks.zones {
                    let migrated = migrated_zone == Some(zone.name);
                    let index = if migrated { 0 } else { zone.name };
                    let nat = zone.nat_gateway.as_ref().filter(|n| n.enabled);
                    let nat_name = indexed_name(&nat_base, index);
                    if let Some(nat) = nat {
                        nat_gateways.push(NatGatewayPlan::new(
                            nat_name.clone(),
                            Some(zone.name),
                            nat.idle_connection_timeout_minutes,
                            &nat.ip_addresses,
                        ));
                    }
                    subnets.push(SubnetPlan {
                        name: indexed_name(&nodes_subnet_base, index),
                        cidr: zone.cidr.clone(),
                        zone: Some(zone.name),
                        service_endpoints: zone.service_endpoints.clone(),
                        nat_gateway: nat.map(|_| nat_name),
                        migrated,
                    });
                }
            }
        }

        let availability_set = (!zoned && !vmo).then(|| AvailabilitySetPlan {
            name: namespace.to_string(),
        });

        Self {
            namespace: namespace.to_string(),
            resource_group_is_foreign: config.resource_group.is_some(),
            resource_group,
            vnet_name,
            vnet_resource_group,
            vnet_is_foreign: vnet.is_foreign(),
            route_table: ROUTE_TABLE_NAME.to_string(),
            security_group: format!("{}-workers", namespace),
            nodes_subnet_base,
            subnets,
            nat_gateways,
            availability_set,
            layout: config.layout(),
            zoned,
        }
    }

    /// Whether `name` follows the naming convention of the worker subnets
    pub fn is_managed_subnet_name(&self, name: &str) -> bool {
        if name == self.nodes_subnet_base {
            return true;
        }
        name.strip_prefix(&self.nodes_subnet_base)
            .and_then(|rest| rest.strip_prefix("-z"))
            .map(|index| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    }

    /// Names of the public IPs the flow owns
    pub fn managed_ip_names(&self) -> Vec<String> {
        self.nat_gateways
            .iter()
            .filter_map(|n| n.managed_ip.clone())
            .collect()
    }
}

impl NatGatewayPlan {
    fn new(
        name: String,
        zone: Option<i32>,
        idle_timeout_minutes: Option<i32>,
        user_ips: &[PublicIpReference],
    ) -> Self {
        let managed_ip = user_ips.is_empty().then(|| managed_ip_name(&name));
        Self {
            name,
            zone,
            idle_timeout_minutes,
            user_ips: user_ips.to_vec(),
            managed_ip,
        }
    }
}

/// Name of the public IP created for a NAT gateway
pub fn managed_ip_name(nat_gateway: &str) -> String {
    format!("{}-ip", nat_gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use azure_api::internal::infrastructure::{
        NatGatewayConfig, NetworkConfig, ResourceGroup, VNet, Zone, ZonedNatGatewayConfig,
    };

    const NS: &str = "shoot--foo--az";

    fn single(nat: bool) -> InfrastructureConfig {
        InfrastructureConfig {
            networks: NetworkConfig {
                vnet: VNet {
                    cidr: Some("10.250.0.0/16".into()),
                    ..Default::default()
                },
                workers: Some("10.250.0.0/19".into()),
                nat_gateway: nat.then(|| NatGatewayConfig {
                    enabled: true,
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn zones(names: &[i32]) -> InfrastructureConfig {
        InfrastructureConfig {
            networks: NetworkConfig {
                vnet: VNet {
                    cidr: Some("10.250.0.0/16".into()),
                    ..Default::default()
                },
                zones: names
                    .iter()
                    .map(|&z| Zone {
                        name: z,
                        cidr: format!("10.250.{}.0/24", z),
                        nat_gateway: Some(ZonedNatGatewayConfig {
                            enabled: true,
                            ..Default::default()
                        }),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
            zoned: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_indexed_name() {
        assert_eq!(indexed_name("shoot--foo--az-nodes", 0), "shoot--foo--az-nodes");
        assert_eq!(indexed_name("shoot--foo--az-nodes", 2), "shoot--foo--az-nodes-z2");
    }

    #[test]
    fn test_single_subnet_with_nat() {
        let plan = InfrastructurePlan::new(NS, &single(true), false, None);

        assert_eq!(plan.resource_group, NS);
        assert_eq!(plan.vnet_name, NS);
        assert_eq!(plan.security_group, "shoot--foo--az-workers");
        assert_eq!(plan.subnets.len(), 1);
        assert_eq!(plan.subnets[0].name, "shoot--foo--az-nodes");
        assert_eq!(plan.subnets[0].nat_gateway.as_deref(), Some("shoot--foo--az-nat-gateway"));
        assert_eq!(plan.managed_ip_names(), vec!["shoot--foo--az-nat-gateway-ip".to_string()]);
        assert!(plan.zoned);
        assert!(plan.availability_set.is_none());
    }

    #[test]
    fn test_availability_set_only_without_zones_and_vmo() {
        let plan = InfrastructurePlan::new(NS, &single(false), false, None);
        assert_eq!(plan.availability_set.map(|a| a.name).as_deref(), Some(NS));

        let plan = InfrastructurePlan::new(NS, &single(false), true, None);
        assert!(plan.availability_set.is_none());
    }

    #[test]
    fn test_zone_names() {
        let plan = InfrastructurePlan::new(NS, &zones(&[1, 2]), false, None);
        let names: Vec<&str> = plan.subnets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["shoot--foo--az-nodes-z1", "shoot--foo--az-nodes-z2"]);
        assert_eq!(plan.nat_gateways[1].name, "shoot--foo--az-nat-gateway-z2");
        assert_eq!(plan.nat_gateways[1].zone, Some(2));
    }

    #[test]
    fn test_migrated_zone_keeps_unsuffixed_names() {
        let plan = InfrastructurePlan::new(NS, &zones(&[1, 2]), false, Some(1));
        assert_eq!(plan.subnets[0].name, "shoot--foo--az-nodes");
        assert!(plan.subnets[0].migrated);
        assert_eq!(plan.nat_gateways[0].name, "shoot--foo--az-nat-gateway");
        assert_eq!(plan.subnets[1].name, "shoot--foo--az-nodes-z2");
        assert!(!plan.subnets[1].migrated);
    }

    #[test]
    fn test_foreign_network() {
        let mut config = single(false);
        config.resource_group = Some(ResourceGroup { name: "user-rg".into() });
        config.networks.vnet = VNet {
            name: Some("ext-vnet".into()),
            resource_group: Some("ext-rg".into()),
            ..Default::default()
        };

        let plan = InfrastructurePlan::new(NS, &config, false, None);
        assert_eq!(plan.resource_group, "user-rg");
        assert!(plan.resource_group_is_foreign);
        assert_eq!(plan.vnet_name, "ext-vnet");
        assert_eq!(plan.vnet_resource_group, "ext-rg");
        assert!(plan.vnet_is_foreign);
    }

    #[test]
    fn test_managed_subnet_names() {
        let plan = InfrastructurePlan::new(NS, &single(false), false, None);
        assert!(plan.is_managed_subnet_name("shoot--foo--az-nodes"));
        assert!(plan.is_managed_subnet_name("shoot--foo--az-nodes-z3"));
        assert!(!plan.is_managed_subnet_name("shoot--foo--az-nodes-zx"));
        assert!(!plan.is_managed_subnet_name("shoot--foo--az-nodes-z"));
        assert!(!plan.is_managed_subnet_name("user-subnet"));
    }
}

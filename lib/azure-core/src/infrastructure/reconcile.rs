//! Ensure tasks of the infrastructure flow
//!
//! Every task computes the desired resource, reads the current one and only
//! writes when a field it owns differs, so the flow can be re-run at any point.

use std::collections::BTreeSet;
use std::sync::Arc;

use azure_client::models::{
    same_id, AddressSpace, AvailabilitySet, AvailabilitySetProperties, NatGateway,
    NatGatewayProperties, PublicIpAddress, PublicIpAddressProperties, RouteTable, SecurityGroup,
    ServiceEndpoint, Sku, SubResource, Subnet, SubnetProperties, Tags, VirtualNetwork,
    VirtualNetworkProperties,
};
use tracing::{debug, info, warn};

use super::context::FlowContext;
use super::plan::{NatGatewayPlan, SubnetPlan};
use crate::error::AzureResultExt;
use crate::flow::{keys, Graph};
use crate::{Error, Result};

pub const ENSURE_RESOURCE_GROUP: &str = "EnsureResourceGroup";
pub const ENSURE_VNET: &str = "EnsureVNet";
pub const ENSURE_ROUTE_TABLE: &str = "EnsureRouteTable";
pub const ENSURE_SECURITY_GROUP: &str = "EnsureSecurityGroup";
pub const ENSURE_IDENTITY: &str = "EnsureIdentity";
pub const ENSURE_PUBLIC_IPS: &str = "EnsurePublicIPs";
pub const ENSURE_NAT_GATEWAYS: &str = "EnsureNATGateways";
pub const ENSURE_SUBNETS: &str = "EnsureSubnets";
pub const ENSURE_AVAILABILITY_SETS: &str = "EnsureAvailabilitySets";
pub const CLEANUP_NAT_GATEWAYS: &str = "CleanupNATGateways";

pub fn reconcile_graph() -> Graph<FlowContext> {
    let mut graph = Graph::new("infrastructure-reconcile");
    graph
        .add(ENSURE_RESOURCE_GROUP, &[], ensure_resource_group)
        .add(ENSURE_VNET, &[ENSURE_RESOURCE_GROUP], ensure_vnet)
        .add(ENSURE_ROUTE_TABLE, &[ENSURE_RESOURCE_GROUP], ensure_route_table)
        .add(ENSURE_SECURITY_GROUP, &[ENSURE_RESOURCE_GROUP], ensure_security_group)
        .add(ENSURE_IDENTITY, &[ENSURE_RESOURCE_GROUP], ensure_identity)
        .add(ENSURE_PUBLIC_IPS, &[ENSURE_RESOURCE_GROUP], ensure_public_ips)
        .add(ENSURE_NAT_GATEWAYS, &[ENSURE_PUBLIC_IPS], ensure_nat_gateways)
        .add(
            ENSURE_SUBNETS,
            &[ENSURE_VNET, ENSURE_ROUTE_TABLE, ENSURE_SECURITY_GROUP, ENSURE_NAT_GATEWAYS],
            ensure_subnets,
        )
        .add(ENSURE_AVAILABILITY_SETS, &[ENSURE_RESOURCE_GROUP], ensure_availability_sets)
        .add(CLEANUP_NAT_GATEWAYS, &[ENSURE_SUBNETS], cleanup_nat_gateways);
    graph
}

async fn ensure_resource_group(ctx: Arc<FlowContext>) -> Result<()> {
    let name = &ctx.plan.resource_group;
    let groups = ctx.factory.resource_groups();

    let group = match groups.get(name).await.with_action(|| format!("get resource group {}", name))? {
        Some(existing) => {
            if !existing.location.eq_ignore_ascii_case(&ctx.region) {
                return Err(Error::configuration(format!(
                    "resource group {} exists in region {}, expected {}",
                    name, existing.location, ctx.region
                )));
            }
            debug!(infrastructure = %ctx.key, resource_group = %name, "Resource group exists");
            existing
        }
        None if ctx.plan.resource_group_is_foreign => {
            return Err(Error::missing_dependency(format!(
                "resource group {} does not exist",
                name
            )));
        }
        None => {
            info!(infrastructure = %ctx.key, resource_group = %name, "Creating resource group");
            let group = groups
                .create_or_update(name, &ctx.region, Tags::new())
                .await
                .with_action(|| format!("ensure resource group {}", name))?;
            ctx.whiteboard.mark_created_resources_exist();
            group
        }
    };

    if let Some(id) = group.id {
        ctx.whiteboard.set(keys::RESOURCE_GROUP_ID, id);
    }
    Ok(())
}

fn vnet_matches(current: &VirtualNetwork, desired: &VirtualNetwork) -> bool {
    let current_plan = current.properties.ddos_protection_plan.as_ref().map(|p| p.id.as_str());
    let desired_plan = desired.properties.ddos_protection_plan.as_ref().map(|p| p.id.as_str());
    let same_plan = match (current_plan, desired_plan) {
        (Some(a), Some(b)) => same_id(a, b),
        (None, None) => true,
        _ => false,
    };
    current.properties.address_space == desired.properties.address_space && same_plan
}

async fn ensure_vnet(ctx: Arc<FlowContext>) -> Result<()> {
    let plan = &ctx.plan;
    let vnets = ctx.factory.virtual_networks();
    let current = vnets
        .get(&plan.vnet_resource_group, &plan.vnet_name)
        .await
        .with_action(|| format!("get virtual network {}", plan.vnet_name))?;

    if plan.vnet_is_foreign {
        let vnet = current.ok_or_else(|| {
            Error::missing_dependency(format!(
                "virtual network {} in resource group {} does not exist",
                plan.vnet_name, plan.vnet_resource_group
            ))
        })?;
        debug!(infrastructure = %ctx.key, vnet = %plan.vnet_name, "Using existing virtual network");
        if let Some(id) = vnet.id {
            ctx.whiteboard.set(keys::VNET_ID, id);
        }
        return Ok(());
    }

    let cidr = ctx
        .config
        .networks
        .vnet
        .cidr
        .clone()
        .ok_or_else(|| Error::configuration("networks.vnet.cidr must be set for a new virtual network"))?;
    let ddos_plan = ctx.config.networks.vnet.ddos_protection_plan_id.clone();
    let desired = VirtualNetwork {
        location: ctx.region.clone(),
        properties: VirtualNetworkProperties {
            address_space: AddressSpace {
                address_prefixes: vec![cidr],
            },
            enable_ddos_protection: ddos_plan.as_ref().map(|_| true),
            ddos_protection_plan: ddos_plan.map(SubResource::new),
            ..Default::default()
        },
        ..Default::default()
    };

    let vnet = match current {
        Some(current) if vnet_matches(&current, &desired) => current,
        current => {
            let desired = VirtualNetwork {
                tags: current.map(|c| c.tags).unwrap_or_default(),
                ..desired
            };
            info!(infrastructure = %ctx.key, vnet = %plan.vnet_name, "Creating or updating virtual network");
            let vnet = vnets
                .create_or_update(&plan.vnet_resource_group, &plan.vnet_name, desired)
                .await
                .with_action(|| format!("ensure virtual network {}", plan.vnet_name))?;
            ctx.whiteboard.mark_created_resources_exist();
            vnet
        }
    };

    if let Some(id) = vnet.id {
        ctx.whiteboard.set(keys::VNET_ID, id);
    }
    Ok(())
}

async fn ensure_route_table(ctx: Arc<FlowContext>) -> Result<()> {
    let name = &ctx.plan.route_table;
    let tables = ctx.factory.route_tables();
    let rg = &ctx.plan.resource_group;

    // Routes belong to the cloud controller manager; an existing table is left alone.
    let table = match tables.get(rg, name).await.with_action(|| format!("get route table {}", name))? {
        Some(table) => table,
        None => {
            info!(infrastructure = %ctx.key, route_table = %name, "Creating route table");
            let table = tables
                .create_or_update(
                    rg,
                    name,
                    RouteTable {
                        location: ctx.region.clone(),
                        ..Default::default()
                    },
                )
                .await
                .with_action(|| format!("ensure route table {}", name))?;
            ctx.whiteboard.mark_created_resources_exist();
            table
        }
    };

    let id = table
        .id
        .ok_or_else(|| Error::internal(format!("route table {} has no ID", name)))?;
    ctx.whiteboard.set(keys::ROUTE_TABLE_ID, id);
    Ok(())
}

async fn ensure_security_group(ctx: Arc<FlowContext>) -> Result<()> {
    let name = &ctx.plan.security_group;
    let groups = ctx.factory.security_groups();
    let rg = &ctx.plan.resource_group;

    let group = match groups
        .get(rg, name)
        .await
        .with_action(|| format!("get security group {}", name))?
    {
        Some(group) => group,
        None => {
            info!(infrastructure = %ctx.key, security_group = %name, "Creating security group");
            let group = groups
                .create_or_update(
                    rg,
                    name,
                    SecurityGroup {
                        location: ctx.region.clone(),
                        ..Default::default()
                    },
                )
                .await
                .with_action(|| format!("ensure security group {}", name))?;
            ctx.whiteboard.mark_created_resources_exist();
            group
        }
    };

    let id = group
        .id
        .ok_or_else(|| Error::internal(format!("security group {} has no ID", name)))?;
    ctx.whiteboard.set(keys::SECURITY_GROUP_ID, id);
    Ok(())
}

async fn ensure_identity(ctx: Arc<FlowContext>) -> Result<()> {
    let Some(config) = &ctx.config.identity else {
        ctx.whiteboard.remove(keys::IDENTITY_ID);
        ctx.whiteboard.remove(keys::IDENTITY_CLIENT_ID);
        return Ok(());
    };

    let identity = ctx
        .factory
        .managed_identities()
        .get(&config.resource_group, &config.name)
        .await
        .with_action(|| format!("get managed identity {}", config.name))?
        .ok_or_else(|| {
            Error::missing_dependency(format!(
                "managed identity {} in resource group {} does not exist",
                config.name, config.resource_group
            ))
        })?;

    let id = identity.id.unwrap_or_default();
    let client_id = identity.properties.client_id.unwrap_or_default();
    debug!(infrastructure = %ctx.key, identity = %config.name, client_id = %client_id, "Found managed identity");
    ctx.whiteboard.set(keys::IDENTITY_ID, id);
    ctx.whiteboard.set(keys::IDENTITY_CLIENT_ID, client_id);
    Ok(())
}

fn zones_of(zone: Option<i32>) -> Vec<String> {
    zone.map(|z| vec![z.to_string()]).unwrap_or_default()
}

async fn ensure_public_ips(ctx: Arc<FlowContext>) -> Result<()> {
    let ips = ctx.factory.public_ips();
    let rg = &ctx.plan.resource_group;

    for nat in &ctx.plan.nat_gateways {
        for reference in &nat.user_ips {
            let ip = ips
                .get(&reference.resource_group, &reference.name)
                .await
                .with_action(|| format!("get public IP {}", reference.name))?
                .ok_or_else(|| {
                    Error::missing_dependency(format!(
                        "public IP {} in resource group {} does not exist",
                        reference.name, reference.resource_group
                    ))
                })?;
            if !ip.is_nat_compatible() {
                return Err(Error::configuration(format!(
                    "public IP {} must be a Standard SKU IPv4 address to be used by NAT gateway {}",
                    reference.name, nat.name
                )));
            }
        }

        let Some(name) = &nat.managed_ip else {
            continue;
        };
        let desired = PublicIpAddress {
            location: ctx.region.clone(),
            sku: Some(Sku::standard()),
            zones: zones_of(nat.zone),
            properties: PublicIpAddressProperties {
                allocation_method: Some("Static".to_string()),
                address_version: Some("IPv4".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let current = ips
            .get(rg, name)
            .await
            .with_action(|| format!("get public IP {}", name))?;
        let ip = match current {
            Some(current) => {
                if current.zones != desired.zones {
                    warn!(
                        infrastructure = %ctx.key,
                        public_ip = %name,
                        "Public IP zones differ from the desired zones and cannot be changed"
                    );
                }
                current
            }
            None => {
                info!(infrastructure = %ctx.key, public_ip = %name, "Creating public IP");
                let ip = ips
                    .create_or_update(rg, name, desired)
                    .await
                    .with_action(|| format!("ensure public IP {}", name))?;
                ctx.whiteboard.mark_created_resources_exist();
                ip
            }
        };
        if let Some(id) = ip.id {
            ctx.whiteboard.set(keys::public_ip(name), id);
        }
    }
    Ok(())
}

fn public_ip_ids(ctx: &FlowContext, nat: &NatGatewayPlan) -> Result<Vec<String>> {
    let subscription = ctx.factory.subscription_id();
    let mut ids: Vec<String> = nat
        .user_ips
        .iter()
        .map(|ip| {
            azure_client::models::resource_id(
                subscription,
                &ip.resource_group,
                azure_client::models::PUBLIC_IP_TYPE,
                &ip.name,
            )
        })
        .collect();
    if let Some(name) = &nat.managed_ip {
        ids.push(ctx.recorded_id(&keys::public_ip(name))?);
    }
    Ok(ids)
}

fn same_refs(current: &[SubResource], desired: &[SubResource]) -> bool {
    current.len() == desired.len()
        && desired
            .iter()
            .all(|d| current.iter().any(|c| same_id(&c.id, &d.id)))
}

fn nat_gateway_matches(current: &NatGateway, desired: &NatGateway) -> bool {
    current.zones == desired.zones
        && current.properties.idle_timeout_in_minutes == desired.properties.idle_timeout_in_minutes
        && same_refs(
            &current.properties.public_ip_addresses,
            &desired.properties.public_ip_addresses,
        )
}

async fn ensure_nat_gateways(ctx: Arc<FlowContext>) -> Result<()> {
    let gateways = ctx.factory.nat_gateways();
    let rg = &ctx.plan.resource_group;

    for nat in &ctx.plan.nat_gateways {
        let desired = NatGateway {
            location: ctx.region.clone(),
            sku: Some(Sku::standard()),
            zones: zones_of(nat.zone),
            properties: NatGatewayProperties {
                idle_timeout_in_minutes: nat.idle_timeout_minutes,
                public_ip_addresses: public_ip_ids(&ctx, nat)?
                    .into_iter()
                    .map(SubResource::new)
                    .collect(),
                ..Default::default()
            },
            ..Default::default()
        };

        let current = gateways
            .get(rg, &nat.name)
            .await
            .with_action(|| format!("get NAT gateway {}", nat.name))?;
        let gateway = match current {
            Some(current) if nat_gateway_matches(&current, &desired) => current,
            _ => {
                info!(infrastructure = %ctx.key, nat_gateway = %nat.name, "Creating or updating NAT gateway");
                let gateway = gateways
                    .create_or_update(rg, &nat.name, desired)
                    .await
                    .with_action(|| format!("ensure NAT gateway {}", nat.name))?;
                ctx.whiteboard.mark_created_resources_exist();
                gateway
            }
        };
        if let Some(id) = gateway.id {
            ctx.whiteboard.set(keys::nat_gateway(&nat.name), id);
        }
    }
    Ok(())
}

fn same_ref(current: &Option<SubResource>, desired: &Option<SubResource>) -> bool {
    match (current, desired) {
        (Some(a), Some(b)) => same_id(&a.id, &b.id),
        (None, None) => true,
        _ => false,
    }
}

fn endpoint_set(endpoints: &[ServiceEndpoint]) -> BTreeSet<&str> {
    endpoints.iter().map(|e| e.service.as_str()).collect()
}

fn subnet_matches(current: &Subnet, desired: &Subnet) -> bool {
    let (c, d) = (&current.properties, &desired.properties);
    c.address_prefix == d.address_prefix
        && same_ref(&c.network_security_group, &d.network_security_group)
        && same_ref(&c.route_table, &d.route_table)
        && same_ref(&c.nat_gateway, &d.nat_gateway)
        && endpoint_set(&c.service_endpoints) == endpoint_set(&d.service_endpoints)
}

fn desired_subnet(ctx: &FlowContext, plan: &SubnetPlan) -> Result<Subnet> {
    let nat_gateway = match &plan.nat_gateway {
        Some(name) => Some(SubResource::new(ctx.recorded_id(&keys::nat_gateway(name))?)),
        None => None,
    };
    Ok(Subnet {
        properties: SubnetProperties {
            address_prefix: Some(plan.cidr.clone()),
            network_security_group: Some(SubResource::new(ctx.recorded_id(keys::SECURITY_GROUP_ID)?)),
            route_table: Some(SubResource::new(ctx.recorded_id(keys::ROUTE_TABLE_ID)?)),
            nat_gateway,
            service_endpoints: plan
                .service_endpoints
                .iter()
                .map(|s| ServiceEndpoint { service: s.clone() })
                .collect(),
            ..Default::default()
        },
        ..Default::default()
    })
}

async fn ensure_subnets(ctx: Arc<FlowContext>) -> Result<()> {
    let subnets = ctx.factory.subnets();
    let plan = &ctx.plan;
    let (rg, vnet) = (&plan.vnet_resource_group, &plan.vnet_name);

    let existing = subnets
        .list(rg, vnet)
        .await
        .with_action(|| format!("list subnets of virtual network {}", vnet))?;
    for stale in existing.iter().filter_map(|s| s.name.as_deref()) {
        if !plan.is_managed_subnet_name(stale) || plan.subnets.iter().any(|s| s.name == stale) {
            continue;
        }
        info!(infrastructure = %ctx.key, subnet = %stale, "Deleting subnet that is no longer configured");
        subnets
            .delete(rg, vnet, stale)
            .await
            .with_action(|| format!("delete subnet {}", stale))?;
        ctx.whiteboard.remove(&keys::subnet(stale));
        ctx.whiteboard.remove(&keys::subnet_nat_gateway(stale));
    }

    for subnet in &plan.subnets {
        let desired = desired_subnet(&ctx, subnet)?;
        let current = existing.iter().find(|s| s.name.as_deref() == Some(subnet.name.as_str()));
        let result = match current {
            Some(current) if subnet_matches(current, &desired) => current.clone(),
            _ => {
                info!(infrastructure = %ctx.key, subnet = %subnet.name, "Creating or updating subnet");
                let result = subnets
                    .create_or_update(rg, vnet, &subnet.name, desired.clone())
                    .await
                    .with_action(|| format!("ensure subnet {}", subnet.name))?;
                ctx.whiteboard.mark_created_resources_exist();
                result
            }
        };

        if let Some(id) = result.id {
            ctx.whiteboard.set(keys::subnet(&subnet.name), id);
        }
        match desired.properties.nat_gateway {
            Some(nat) => ctx.whiteboard.set(keys::subnet_nat_gateway(&subnet.name), nat.id),
            None => {
                ctx.whiteboard.remove(&keys::subnet_nat_gateway(&subnet.name));
            }
        }
    }
    Ok(())
}

async fn ensure_availability_sets(ctx: Arc<FlowContext>) -> Result<()> {
    let Some(plan) = &ctx.plan.availability_set else {
        return Ok(());
    };
    let sets = ctx.factory.availability_sets();
    let rg = &ctx.plan.resource_group;

    let fault_domains = ctx.cloud_profile.fault_domain_count(&ctx.region).ok_or_else(|| {
        Error::configuration(format!(
            "cloud profile defines no fault domain count for region {}",
            ctx.region
        ))
    })?;
    let update_domains = ctx.cloud_profile.update_domain_count(&ctx.region).ok_or_else(|| {
        Error::configuration(format!(
            "cloud profile defines no update domain count for region {}",
            ctx.region
        ))
    })?;

    let current = sets
        .get(rg, &plan.name)
        .await
        .with_action(|| format!("get availability set {}", plan.name))?;
    let set = match current {
        Some(current) => {
            // Domain counts are immutable once the set exists.
            if current.properties.platform_fault_domain_count != Some(fault_domains) {
                warn!(
                    infrastructure = %ctx.key,
                    availability_set = %plan.name,
                    "Availability set fault domain count differs from the cloud profile"
                );
            }
            current
        }
        None => {
            info!(infrastructure = %ctx.key, availability_set = %plan.name, "Creating availability set");
            let set = sets
                .create_or_update(
                    rg,
                    &plan.name,
                    AvailabilitySet {
                        location: ctx.region.clone(),
                        sku: Some(Sku::aligned()),
                        properties: AvailabilitySetProperties {
                            platform_fault_domain_count: Some(fault_domains),
                            platform_update_domain_count: Some(update_domains),
                        },
                        ..Default::default()
                    },
                )
                .await
                .with_action(|| format!("ensure availability set {}", plan.name))?;
            ctx.whiteboard.mark_created_resources_exist();
            set
        }
    };

    if let Some(id) = set.id {
        ctx.whiteboard.set(keys::availability_set(&plan.name), id);
    }
    Ok(())
}

/// Remove NAT gateways and their public IPs that are no longer configured.
/// Runs after the subnets released them.
async fn cleanup_nat_gateways(ctx: Arc<FlowContext>) -> Result<()> {
    let rg = &ctx.plan.resource_group;

    let gateways = ctx.factory.nat_gateways();
    for name in ctx.whiteboard.names_with_prefix(keys::NAT_GATEWAY_PREFIX) {
        if ctx.plan.nat_gateways.iter().any(|n| n.name == name) {
            continue;
        }
        info!(infrastructure = %ctx.key, nat_gateway = %name, "Deleting NAT gateway that is no longer configured");
        gateways
            .delete(rg, &name)
            .await
            .with_action(|| format!("delete NAT gateway {}", name))?;
        ctx.whiteboard.remove(&keys::nat_gateway(&name));
    }

    let ips = ctx.factory.public_ips();
    let managed = ctx.plan.managed_ip_names();
    for name in ctx.whiteboard.names_with_prefix(keys::PUBLIC_IP_PREFIX) {
        if managed.contains(&name) {
            continue;
        }
        info!(infrastructure = %ctx.key, public_ip = %name, "Deleting public IP that is no longer used");
        ips.delete(rg, &name)
            .await
            .with_action(|| format!("delete public IP {}", name))?;
        ctx.whiteboard.remove(&keys::public_ip(&name));
    }
    Ok(())
}

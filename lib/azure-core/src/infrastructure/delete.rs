//! Delete tasks of the infrastructure flow
//!
//! A managed resource group is removed as a whole. A user-owned group is
//! emptied piece by piece, leaving everything the flow did not create.
//! Subnets in a foreign VNet are always deleted individually.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use super::context::FlowContext;
use crate::error::AzureResultExt;
use crate::flow::{keys, Graph};
use crate::Result;

pub const DELETE_SUBNETS: &str = "DeleteSubnets";
pub const DELETE_RESOURCE_GROUP: &str = "DeleteResourceGroup";
pub const DELETE_NAT_GATEWAYS: &str = "DeleteNATGateways";
pub const DELETE_PUBLIC_IPS: &str = "DeletePublicIPs";
pub const DELETE_VNET: &str = "DeleteVNet";
pub const DELETE_ROUTE_TABLE: &str = "DeleteRouteTable";
pub const DELETE_SECURITY_GROUP: &str = "DeleteSecurityGroup";
pub const DELETE_AVAILABILITY_SET: &str = "DeleteAvailabilitySet";

pub fn delete_graph(ctx: &FlowContext) -> Graph<FlowContext> {
    let mut graph = Graph::new("infrastructure-delete");

    if !ctx.plan.resource_group_is_foreign {
        if ctx.plan.vnet_is_foreign {
            graph
                .add(DELETE_SUBNETS, &[], delete_subnets)
                .add(DELETE_RESOURCE_GROUP, &[DELETE_SUBNETS], delete_resource_group);
        } else {
            graph.add(DELETE_RESOURCE_GROUP, &[], delete_resource_group);
        }
        return graph;
    }

    graph
        .add(DELETE_SUBNETS, &[], delete_subnets)
        .add(DELETE_NAT_GATEWAYS, &[DELETE_SUBNETS], delete_nat_gateways)
        .add(DELETE_PUBLIC_IPS, &[DELETE_NAT_GATEWAYS], delete_public_ips)
        .add(DELETE_ROUTE_TABLE, &[DELETE_SUBNETS], delete_route_table)
        .add(DELETE_SECURITY_GROUP, &[DELETE_SUBNETS], delete_security_group)
        .add(DELETE_AVAILABILITY_SET, &[], delete_availability_set);
    if !ctx.plan.vnet_is_foreign {
        graph.add(DELETE_VNET, &[DELETE_SUBNETS], delete_vnet);
    }
    graph
}

async fn delete_resource_group(ctx: Arc<FlowContext>) -> Result<()> {
    let name = &ctx.plan.resource_group;
    info!(infrastructure = %ctx.key, resource_group = %name, "Deleting resource group");
    ctx.factory
        .resource_groups()
        .delete(name)
        .await
        .with_action(|| format!("delete resource group {}", name))?;
    ctx.whiteboard.remove(keys::RESOURCE_GROUP_ID);
    Ok(())
}

/// Worker subnets carrying the managed naming convention. A NAT gateway
/// binding is released before the subnet is deleted.
async fn delete_subnets(ctx: Arc<FlowContext>) -> Result<()> {
    let subnets = ctx.factory.subnets();
    let (rg, vnet) = (&ctx.plan.vnet_resource_group, &ctx.plan.vnet_name);

    let vnet_exists = ctx
        .factory
        .virtual_networks()
        .get(rg, vnet)
        .await
        .with_action(|| format!("get virtual network {}", vnet))?
        .is_some();
    if !vnet_exists {
        debug!(infrastructure = %ctx.key, vnet = %vnet, "Virtual network is gone, no subnets to delete");
        return Ok(());
    }

    let existing = subnets
        .list(rg, vnet)
        .await
        .with_action(|| format!("list subnets of virtual network {}", vnet))?;
    for subnet in existing {
        let Some(name) = subnet.name.clone() else {
            continue;
        };
        if !ctx.plan.is_managed_subnet_name(&name) {
            continue;
        }

        if subnet.properties.nat_gateway.is_some() {
            debug!(infrastructure = %ctx.key, subnet = %name, "Releasing NAT gateway of subnet");
            let mut released = subnet.clone();
            released.properties.nat_gateway = None;
            subnets
                .create_or_update(rg, vnet, &name, released)
                .await
                .with_action(|| format!("release NAT gateway of subnet {}", name))?;
            ctx.whiteboard.remove(&keys::subnet_nat_gateway(&name));
        }

        info!(infrastructure = %ctx.key, subnet = %name, "Deleting subnet");
        subnets
            .delete(rg, vnet, &name)
            .await
            .with_action(|| format!("delete subnet {}", name))?;
        ctx.whiteboard.remove(&keys::subnet(&name));
    }
    Ok(())
}

/// Planned names plus whatever an earlier configuration left on the whiteboard
fn known_names(planned: impl Iterator<Item = String>, recorded: Vec<String>) -> BTreeSet<String> {
    planned.chain(recorded).collect()
}

async fn delete_nat_gateways(ctx: Arc<FlowContext>) -> Result<()> {
    let gateways = ctx.factory.nat_gateways();
    let rg = &ctx.plan.resource_group;
    let names = known_names(
        ctx.plan.nat_gateways.iter().map(|n| n.name.clone()),
        ctx.whiteboard.names_with_prefix(keys::NAT_GATEWAY_PREFIX),
    );
    for name in names {
        info!(infrastructure = %ctx.key, nat_gateway = %name, "Deleting NAT gateway");
        gateways
            .delete(rg, &name)
            .await
            .with_action(|| format!("delete NAT gateway {}", name))?;
        ctx.whiteboard.remove(&keys::nat_gateway(&name));
    }
    Ok(())
}

/// Only IPs the flow created; user-provided IPs are left alone
async fn delete_public_ips(ctx: Arc<FlowContext>) -> Result<()> {
    let ips = ctx.factory.public_ips();
    let rg = &ctx.plan.resource_group;
    let names = known_names(
        ctx.plan.managed_ip_names().into_iter(),
        ctx.whiteboard.names_with_prefix(keys::PUBLIC_IP_PREFIX),
    );
    for name in names {
        info!(infrastructure = %ctx.key, public_ip = %name, "Deleting public IP");
        ips.delete(rg, &name)
            .await
            .with_action(|| format!("delete public IP {}", name))?;
        ctx.whiteboard.remove(&keys::public_ip(&name));
    }
    Ok(())
}

async fn delete_vnet(ctx: Arc<FlowContext>) -> Result<()> {
    let (rg, name) = (&ctx.plan.vnet_resource_group, &ctx.plan.vnet_name);
    info!(infrastructure = %ctx.key, vnet = %name, "Deleting virtual network");
    ctx.factory
        .virtual_networks()
        .delete(rg, name)
        .await
        .with_action(|| format!("delete virtual network {}", name))?;
    ctx.whiteboard.remove(keys::VNET_ID);
    Ok(())
}

async fn delete_route_table(ctx: Arc<FlowContext>) -> Result<()> {
    let name = &ctx.plan.route_table;
    info!(infrastructure = %ctx.key, route_table = %name, "Deleting route table");
    ctx.factory
        .route_tables()
        .delete(&ctx.plan.resource_group, name)
        .await
        .with_action(|| format!("delete route table {}", name))?;
    ctx.whiteboard.remove(keys::ROUTE_TABLE_ID);
    Ok(())
}

async fn delete_security_group(ctx: Arc<FlowContext>) -> Result<()> {
    let name = &ctx.plan.security_group;
    info!(infrastructure = %ctx.key, security_group = %name, "Deleting security group");
    ctx.factory
        .security_groups()
        .delete(&ctx.plan.resource_group, name)
        .await
        .with_action(|| format!("delete security group {}", name))?;
    ctx.whiteboard.remove(keys::SECURITY_GROUP_ID);
    Ok(())
}

async fn delete_availability_set(ctx: Arc<FlowContext>) -> Result<()> {
    let names = known_names(
        ctx.plan.availability_set.iter().map(|a| a.name.clone()),
        ctx.whiteboard.names_with_prefix(keys::AVAILABILITY_SET_PREFIX),
    );
    for name in names {
        info!(infrastructure = %ctx.key, availability_set = %name, "Deleting availability set");
        ctx.factory
            .availability_sets()
            .delete(&ctx.plan.resource_group, &name)
            .await
            .with_action(|| format!("delete availability set {}", name))?;
        ctx.whiteboard.remove(&keys::availability_set(&name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Whiteboard;
    use crate::infrastructure::plan::InfrastructurePlan;
    use azure_api::internal::infrastructure::{
        InfrastructureConfig, NetworkConfig, ResourceGroup, VNet,
    };
    use azure_api::v1alpha1::CloudProfileConfig;
    use azure_client::fake::FakeAzure;

    fn context(user_rg: bool, foreign_vnet: bool) -> FlowContext {
        let mut config = InfrastructureConfig {
            networks: NetworkConfig {
                vnet: VNet {
                    cidr: Some("10.250.0.0/16".into()),
                    ..Default::default()
                },
                workers: Some("10.250.0.0/19".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        if user_rg {
            config.resource_group = Some(ResourceGroup { name: "user-rg".into() });
        }
        if foreign_vnet {
            config.networks.vnet = VNet {
                name: Some("ext-vnet".into()),
                resource_group: Some("ext-rg".into()),
                ..Default::default()
            };
        }
        let plan = InfrastructurePlan::new("shoot--foo--az", &config, false, None);
        FlowContext {
            key: "shoot--foo--az/az".into(),
            region: "westeurope".into(),
            config,
            plan,
            cloud_profile: CloudProfileConfig::default(),
            factory: Arc::new(FakeAzure::new()),
            whiteboard: Whiteboard::default(),
        }
    }

    fn tasks(ctx: &FlowContext) -> Vec<Vec<String>> {
        delete_graph(ctx)
            .compile()
            .unwrap()
            .groups()
            .into_iter()
            .map(|g| g.into_iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_managed_group_is_deleted_whole() {
        assert_eq!(tasks(&context(false, false)), vec![vec![DELETE_RESOURCE_GROUP.to_string()]]);
    }

    #[test]
    fn test_foreign_vnet_subnets_go_first() {
        assert_eq!(
            tasks(&context(false, true)),
            vec![vec![DELETE_SUBNETS.to_string()], vec![DELETE_RESOURCE_GROUP.to_string()]]
        );
    }

    #[test]
    fn test_user_group_is_emptied() {
        let groups = tasks(&context(true, false));
        let all: Vec<&String> = groups.iter().flatten().collect();
        assert!(!all.iter().any(|t| *t == DELETE_RESOURCE_GROUP));
        assert!(all.iter().any(|t| *t == DELETE_VNET));
        assert!(groups[0].contains(&DELETE_SUBNETS.to_string()));

        let groups = tasks(&context(true, true));
        assert!(!groups.iter().flatten().any(|t| t == DELETE_VNET));
    }
}

//! Provider status published after a successful reconcile

use azure_api::internal::infrastructure::{
    AvailabilitySet, IdentityStatus, InfrastructureConfig, InfrastructureStatus, NetworkStatus,
    OutboundAccessType, Purpose, ResourceGroup, RouteTable, SecurityGroup, Subnet, VNetStatus,
};

use super::context::FlowContext;
use super::plan::InfrastructurePlan;
use crate::flow::{keys, Whiteboard};

/// Build the status from what the flow recorded.
///
/// `nat_gateway_public_ip_migrated` is not owned by the flow and is carried
/// over from `previous`.
pub fn compute_status(
    ctx: &FlowContext,
    previous: Option<&InfrastructureStatus>,
) -> InfrastructureStatus {
    build(
        &ctx.plan,
        &ctx.config,
        &ctx.whiteboard,
        ctx.cloud_profile.fault_domain_count(&ctx.region),
        ctx.cloud_profile.update_domain_count(&ctx.region),
        previous,
    )
}

fn build(
    plan: &InfrastructurePlan,
    config: &InfrastructureConfig,
    whiteboard: &Whiteboard,
    fault_domains: Option<i32>,
    update_domains: Option<i32>,
    previous: Option<&InfrastructureStatus>,
) -> InfrastructureStatus {
    let subnets = plan
        .subnets
        .iter()
        .map(|s| Subnet {
            name: s.name.clone(),
            purpose: Purpose::Nodes,
            zone: s.zone.map(|z| z.to_string()),
            migrated: s.migrated,
        })
        .collect();

    let outbound_access_type = if plan.subnets.iter().all(|s| s.nat_gateway.is_some()) {
        OutboundAccessType::NatGateway
    } else {
        OutboundAccessType::LoadBalancer
    };

    let availability_sets = plan
        .availability_set
        .iter()
        .filter_map(|set| {
            let id = whiteboard.get(&keys::availability_set(&set.name))?;
            Some(AvailabilitySet {
                purpose: Purpose::Nodes,
                id,
                name: set.name.clone(),
                count_fault_domains: fault_domains,
                count_update_domains: update_domains,
            })
        })
        .collect();

    let identity = config.identity.as_ref().and_then(|identity| {
        Some(IdentityStatus {
            id: whiteboard.get(keys::IDENTITY_ID)?,
            client_id: whiteboard.get(keys::IDENTITY_CLIENT_ID)?,
            acr_access: identity.acr_access.unwrap_or(false),
        })
    });

    InfrastructureStatus {
        networks: NetworkStatus {
            vnet: VNetStatus {
                name: plan.vnet_name.clone(),
                resource_group: plan.vnet_is_foreign.then(|| plan.vnet_resource_group.clone()),
            },
            subnets,
            layout: plan.layout,
            outbound_access_type: Some(outbound_access_type),
        },
        resource_group: ResourceGroup {
            name: plan.resource_group.clone(),
        },
        availability_sets,
        route_tables: vec![RouteTable {
            purpose: Purpose::Nodes,
            name: plan.route_table.clone(),
        }],
        security_groups: vec![SecurityGroup {
            purpose: Purpose::Nodes,
            name: plan.security_group.clone(),
        }],
        identity,
        zoned: plan.zoned,
        nat_gateway_public_ip_migrated: previous
            .map(|p| p.nat_gateway_public_ip_migrated)
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azure_api::internal::infrastructure::{
        IdentityConfig, NatGatewayConfig, NetworkConfig, NetworkLayout, VNet,
    };

    const NS: &str = "shoot--foo--az";

    fn config(nat: bool, zoned: bool) -> InfrastructureConfig {
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
            zoned,
            ..Default::default()
        }
    }

    #[test]
    fn test_status_of_zoned_nat_shoot() {
        let config = config(true, true);
        let plan = InfrastructurePlan::new(NS, &config, false, None);
        let status = build(&plan, &config, &Whiteboard::default(), None, None, None);

        assert_eq!(status.networks.layout, NetworkLayout::SingleSubnet);
        assert_eq!(status.networks.outbound_access_type, Some(OutboundAccessType::NatGateway));
        assert_eq!(status.networks.subnets[0].name, "shoot--foo--az-nodes");
        assert_eq!(status.networks.vnet.name, NS);
        assert!(status.networks.vnet.resource_group.is_none());
        assert_eq!(status.route_tables[0].name, "worker_route_table");
        assert_eq!(status.security_groups[0].name, "shoot--foo--az-workers");
        assert!(status.availability_sets.is_empty());
        assert!(status.zoned);
    }

    #[test]
    fn test_status_of_non_zoned_shoot() {
        let mut config = config(false, false);
        config.identity = Some(IdentityConfig {
            name: "id".into(),
            resource_group: "id-rg".into(),
            acr_access: Some(true),
        });
        let plan = InfrastructurePlan::new(NS, &config, false, None);
        let board = Whiteboard::default();
        board.set(keys::availability_set(NS), "/avset");
        board.set(keys::IDENTITY_ID, "/identity");
        board.set(keys::IDENTITY_CLIENT_ID, "client");
        let previous = InfrastructureStatus {
            nat_gateway_public_ip_migrated: true,
            ..Default::default()
        };

        let status = build(&plan, &config, &board, Some(2), Some(5), Some(&previous));

        assert_eq!(status.networks.outbound_access_type, Some(OutboundAccessType::LoadBalancer));
        assert_eq!(status.availability_sets.len(), 1);
        assert_eq!(status.availability_sets[0].id, "/avset");
        assert_eq!(status.availability_sets[0].count_fault_domains, Some(2));
        let identity = status.identity.unwrap();
        assert_eq!(identity.client_id, "client");
        assert!(identity.acr_access);
        assert!(status.nat_gateway_public_ip_migrated);
        assert!(!status.zoned);
    }
}

//! Conversion between the v1alpha1 wire form and the internal form

use crate::v1alpha1::{self, GROUP_VERSION, KIND_INFRASTRUCTURE_STATUS};

use super::{backup_bucket as bb, control_plane as cp, infrastructure as infra};

impl From<v1alpha1::InfrastructureConfig> for infra::InfrastructureConfig {
    fn from(c: v1alpha1::InfrastructureConfig) -> Self {
        Self {
            resource_group: c
                .resource_group
                .map(|rg| infra::ResourceGroup { name: rg.name }),
            networks: c.networks.into(),
            identity: c.identity.map(|i| infra::IdentityConfig {
                name: i.name,
                resource_group: i.resource_group,
                acr_access: i.acr_access,
            }),
            zoned: c.zoned,
        }
    }
}

impl From<v1alpha1::infrastructure::NetworkConfig> for infra::NetworkConfig {
    fn from(n: v1alpha1::infrastructure::NetworkConfig) -> Self {
        Self {
            vnet: infra::VNet {
                name: n.vnet.name,
                resource_group: n.vnet.resource_group,
                cidr: n.vnet.cidr,
                ddos_protection_plan_id: n.vnet.ddos_protection_plan_id,
            },
            workers: n.workers,
            nat_gateway: n.nat_gateway.map(|nat| infra::NatGatewayConfig {
                enabled: nat.enabled,
                idle_connection_timeout_minutes: nat.idle_connection_timeout_minutes,
                zone: nat.zone,
                ip_addresses: nat
                    .ip_addresses
                    .into_iter()
                    .map(|ip| infra::PublicIpReference {
                        name: ip.name,
                        resource_group: ip.resource_group,
                        zone: Some(ip.zone),
                    })
                    .collect(),
            }),
            service_endpoints: n.service_endpoints,
            zones: n
                .zones
                .into_iter()
                .map(|z| infra::Zone {
                    name: z.name,
                    cidr: z.cidr,
                    service_endpoints: z.service_endpoints,
                    nat_gateway: z.nat_gateway.map(|nat| infra::ZonedNatGatewayConfig {
                        enabled: nat.enabled,
                        idle_connection_timeout_minutes: nat.idle_connection_timeout_minutes,
                        ip_addresses: nat
                            .ip_addresses
                            .into_iter()
                            .map(|ip| infra::PublicIpReference {
                                name: ip.name,
                                resource_group: ip.resource_group,
                                zone: None,
                            })
                            .collect(),
                    }),
                })
                .collect(),
        }
    }
}

impl From<infra::InfrastructureConfig> for v1alpha1::InfrastructureConfig {
    fn from(c: infra::InfrastructureConfig) -> Self {
        let n = c.networks;
        Self {
            api_version: Some(GROUP_VERSION.to_string()),
            kind: Some(v1alpha1::KIND_INFRASTRUCTURE_CONFIG.to_string()),
            resource_group: c
                .resource_group
                .map(|rg| v1alpha1::infrastructure::ResourceGroup { name: rg.name }),
            networks: v1alpha1::infrastructure::NetworkConfig {
                vnet: v1alpha1::infrastructure::VNet {
                    name: n.vnet.name,
                    resource_group: n.vnet.resource_group,
                    cidr: n.vnet.cidr,
                    ddos_protection_plan_id: n.vnet.ddos_protection_plan_id,
                },
                workers: n.workers,
                nat_gateway: n.nat_gateway.map(|nat| v1alpha1::infrastructure::NatGatewayConfig {
                    enabled: nat.enabled,
                    idle_connection_timeout_minutes: nat.idle_connection_timeout_minutes,
                    zone: nat.zone,
                    ip_addresses: nat
                        .ip_addresses
                        .into_iter()
                        .map(|ip| v1alpha1::infrastructure::PublicIpReference {
                            name: ip.name,
                            resource_group: ip.resource_group,
                            zone: ip.zone.unwrap_or_default(),
                        })
                        .collect(),
                }),
                service_endpoints: n.service_endpoints,
                zones: n
                    .zones
                    .into_iter()
                    .map(|z| v1alpha1::infrastructure::Zone {
                        name: z.name,
                        cidr: z.cidr,
                        service_endpoints: z.service_endpoints,
                        nat_gateway: z.nat_gateway.map(|nat| {
                            v1alpha1::infrastructure::ZonedNatGatewayConfig {
                                enabled: nat.enabled,
                                idle_connection_timeout_minutes: nat
                                    .idle_connection_timeout_minutes,
                                ip_addresses: nat
                                    .ip_addresses
                                    .into_iter()
                                    .map(|ip| v1alpha1::infrastructure::ZonedPublicIpReference {
                                        name: ip.name,
                                        resource_group: ip.resource_group,
                                    })
                                    .collect(),
                            }
                        }),
                    })
                    .collect(),
            },
            identity: c
                .identity
                .map(|i| v1alpha1::infrastructure::IdentityConfig {
                    name: i.name,
                    resource_group: i.resource_group,
                    acr_access: i.acr_access,
                }),
            zoned: c.zoned,
        }
    }
}

impl From<v1alpha1::InfrastructureStatus> for infra::InfrastructureStatus {
    fn from(s: v1alpha1::InfrastructureStatus) -> Self {
        Self {
            networks: infra::NetworkStatus {
                vnet: infra::VNetStatus {
                    name: s.networks.vnet.name,
                    resource_group: s.networks.vnet.resource_group,
                },
                subnets: s
                    .networks
                    .subnets
                    .into_iter()
                    .map(|sn| infra::Subnet {
                        name: sn.name,
                        purpose: sn.purpose,
                        zone: sn.zone,
                        migrated: sn.migrated,
                    })
                    .collect(),
                layout: s.networks.layout,
                outbound_access_type: s.networks.outbound_access_type,
            },
            resource_group: infra::ResourceGroup {
                name: s.resource_group.name,
            },
            availability_sets: s
                .availability_sets
                .into_iter()
                .map(|a| infra::AvailabilitySet {
                    purpose: a.purpose,
                    id: a.id,
                    name: a.name,
                    count_fault_domains: a.count_fault_domains,
                    count_update_domains: a.count_update_domains,
                })
                .collect(),
            route_tables: s
                .route_tables
                .into_iter()
                .map(|r| infra::RouteTable {
                    purpose: r.purpose,
                    name: r.name,
                })
                .collect(),
            security_groups: s
                .security_groups
                .into_iter()
                .map(|g| infra::SecurityGroup {
                    purpose: g.purpose,
                    name: g.name,
                })
                .collect(),
            identity: s.identity.map(|i| infra::IdentityStatus {
                id: i.id,
                client_id: i.client_id,
                acr_access: i.acr_access,
            }),
            zoned: s.zoned,
            nat_gateway_public_ip_migrated: s.nat_gateway_public_ip_migrated,
        }
    }
}

impl From<infra::InfrastructureStatus> for v1alpha1::InfrastructureStatus {
    fn from(s: infra::InfrastructureStatus) -> Self {
        use v1alpha1::infrastructure as ext;

        Self {
            api_version: Some(GROUP_VERSION.to_string()),
            kind: Some(KIND_INFRASTRUCTURE_STATUS.to_string()),
            networks: ext::NetworkStatus {
                vnet: ext::VNetStatus {
                    name: s.networks.vnet.name,
                    resource_group: s.networks.vnet.resource_group,
                },
                subnets: s
                    .networks
                    .subnets
                    .into_iter()
                    .map(|sn| ext::Subnet {
                        name: sn.name,
                        purpose: sn.purpose,
                        zone: sn.zone,
                        migrated: sn.migrated,
                    })
                    .collect(),
                layout: s.networks.layout,
                outbound_access_type: s.networks.outbound_access_type,
            },
            resource_group: ext::ResourceGroup {
                name: s.resource_group.name,
            },
            availability_sets: s
                .availability_sets
                .into_iter()
                .map(|a| ext::AvailabilitySet {
                    purpose: a.purpose,
                    id: a.id,
                    name: a.name,
                    count_fault_domains: a.count_fault_domains,
                    count_update_domains: a.count_update_domains,
                })
                .collect(),
            route_tables: s
                .route_tables
                .into_iter()
                .map(|r| ext::RouteTable {
                    purpose: r.purpose,
                    name: r.name,
                })
                .collect(),
            security_groups: s
                .security_groups
                .into_iter()
                .map(|g| ext::SecurityGroup {
                    purpose: g.purpose,
                    name: g.name,
                })
                .collect(),
            identity: s.identity.map(|i| ext::IdentityStatus {
                id: i.id,
                client_id: i.client_id,
                acr_access: i.acr_access,
            }),
            zoned: s.zoned,
            nat_gateway_public_ip_migrated: s.nat_gateway_public_ip_migrated,
        }
    }
}

impl From<v1alpha1::ControlPlaneConfig> for cp::ControlPlaneConfig {
    fn from(c: v1alpha1::ControlPlaneConfig) -> Self {
        Self {
            cloud_controller_manager: c.cloud_controller_manager.map(|ccm| {
                cp::CloudControllerManagerConfig {
                    feature_gates: ccm.feature_gates,
                }
            }),
            storage: c.storage.map(|s| cp::Storage {
                managed_default_storage_class: s.managed_default_storage_class,
                managed_default_volume_snapshot_class: s.managed_default_volume_snapshot_class,
            }),
        }
    }
}

impl From<cp::ControlPlaneConfig> for v1alpha1::ControlPlaneConfig {
    fn from(c: cp::ControlPlaneConfig) -> Self {
        Self {
            api_version: Some(GROUP_VERSION.to_string()),
            kind: Some(v1alpha1::KIND_CONTROL_PLANE_CONFIG.to_string()),
            cloud_controller_manager: c.cloud_controller_manager.map(|ccm| {
                v1alpha1::control_plane::CloudControllerManagerConfig {
                    feature_gates: ccm.feature_gates,
                }
            }),
            storage: c.storage.map(|s| v1alpha1::control_plane::Storage {
                managed_default_storage_class: s.managed_default_storage_class,
                managed_default_volume_snapshot_class: s.managed_default_volume_snapshot_class,
            }),
        }
    }
}

impl From<v1alpha1::BackupBucketConfig> for bb::BackupBucketConfig {
    fn from(c: v1alpha1::BackupBucketConfig) -> Self {
        Self {
            immutability: c.immutability.map(|i| bb::ImmutableConfig {
                retention_type: i.retention_type,
                retention_period: i.retention_period,
                locked: i.locked,
            }),
            rotation_config: c.rotation_config.map(|r| bb::RotationConfig {
                rotation_period_in_days: r.rotation_period_in_days,
                expiration_period_in_days: r.expiration_period_in_days,
            }),
        }
    }
}

impl From<bb::BackupBucketConfig> for v1alpha1::BackupBucketConfig {
    fn from(c: bb::BackupBucketConfig) -> Self {
        Self {
            api_version: Some(GROUP_VERSION.to_string()),
            kind: Some(v1alpha1::KIND_BACKUP_BUCKET_CONFIG.to_string()),
            immutability: c
                .immutability
                .map(|i| v1alpha1::backup_bucket::ImmutableConfig {
                    retention_type: i.retention_type,
                    retention_period: i.retention_period,
                    locked: i.locked,
                }),
            rotation_config: c
                .rotation_config
                .map(|r| v1alpha1::backup_bucket::RotationConfig {
                    rotation_period_in_days: r.rotation_period_in_days,
                    expiration_period_in_days: r.expiration_period_in_days,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(raw: serde_json::Value) -> serde_json::Value {
        let external: v1alpha1::InfrastructureConfig = serde_json::from_value(raw).unwrap();
        let internal: infra::InfrastructureConfig = external.into();
        let back: v1alpha1::InfrastructureConfig = internal.into();
        serde_json::to_value(back).unwrap()
    }

    #[test]
    fn test_infrastructure_config_round_trip_multi_zone() {
        let raw = json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "InfrastructureConfig",
            "resourceGroup": {"name": "my-rg"},
            "networks": {
                "vnet": {"cidr": "10.250.0.0/16"},
                "zones": [
                    {
                        "name": 1,
                        "cidr": "10.250.0.0/24",
                        "serviceEndpoints": ["Microsoft.Storage"],
                        "natGateway": {
                            "enabled": true,
                            "idleConnectionTimeoutMinutes": 10,
                            "ipAddresses": [{"name": "ip", "resourceGroup": "ip-rg"}]
                        }
                    },
                    {"name": 2, "cidr": "10.250.1.0/24"}
                ]
            },
            "identity": {"name": "id", "resourceGroup": "id-rg", "acrAccess": true},
            "zoned": true
        });
        assert_eq!(round_trip(raw.clone()), raw);
    }

    #[test]
    fn test_infrastructure_config_round_trip_foreign_vnet() {
        let raw = json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "InfrastructureConfig",
            "networks": {
                "vnet": {"name": "ext-vnet", "resourceGroup": "ext-rg"},
                "workers": "10.250.0.0/19",
                "natGateway": {
                    "enabled": true,
                    "zone": 2,
                    "ipAddresses": [{"name": "ip", "resourceGroup": "ip-rg", "zone": 2}]
                }
            },
            "zoned": true
        });
        assert_eq!(round_trip(raw.clone()), raw);
    }

    #[test]
    fn test_status_round_trip() {
        let raw = json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "InfrastructureStatus",
            "networks": {
                "vnet": {"name": "vnet", "resourceGroup": "rg"},
                "subnets": [{"name": "nodes", "purpose": "nodes", "zone": "1", "migrated": true}],
                "layout": "MultipleSubnet",
                "outboundAccessType": "NatGateway"
            },
            "resourceGroup": {"name": "rg"},
            "availabilitySets": [],
            "routeTables": [{"purpose": "nodes", "name": "worker_route_table"}],
            "securityGroups": [{"purpose": "nodes", "name": "sg"}],
            "zoned": true
        });
        let external: v1alpha1::InfrastructureStatus = serde_json::from_value(raw.clone()).unwrap();
        let internal: infra::InfrastructureStatus = external.into();
        let back: v1alpha1::InfrastructureStatus = internal.into();
        assert_eq!(serde_json::to_value(back).unwrap(), raw);
    }
}

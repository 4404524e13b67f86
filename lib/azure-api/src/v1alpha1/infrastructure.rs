use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{GROUP_VERSION, KIND_INFRASTRUCTURE_STATE};

/// InfrastructureConfig is the provider config of an Infrastructure resource
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InfrastructureConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Existing resource group to deploy into; never deleted by the extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<ResourceGroup>,

    /// Network layout of the cluster
    #[serde(default)]
    pub networks: NetworkConfig,

    /// Existing managed identity attached to the worker nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfig>,

    /// Whether the cluster spreads over availability zones
    #[serde(default)]
    pub zoned: bool,
}

/// Reference to a resource group
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceGroup {
    pub name: String,
}

/// Network configuration of the infrastructure
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetworkConfig {
    /// Virtual network to create or to reuse
    #[serde(default)]
    pub vnet: VNet,

    /// CIDR of the single worker subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<String>,

    /// NAT gateway of the single worker subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway: Option<NatGatewayConfig>,

    /// Service endpoints attached to the single worker subnet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_endpoints: Vec<String>,

    /// Per-zone subnets (multiple subnet layout)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<Zone>,
}

/// Virtual network reference or definition
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VNet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,

    #[serde(
        rename = "ddosProtectionPlanID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ddos_protection_plan_id: Option<String>,
}

/// Subnet of a single availability zone
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Zone {
    /// Azure zone number
    pub name: i32,

    pub cidr: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_endpoints: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway: Option<ZonedNatGatewayConfig>,
}

/// NAT gateway of the single worker subnet
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NatGatewayConfig {
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_connection_timeout_minutes: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<PublicIpReference>,
}

/// NAT gateway of a zonal subnet
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ZonedNatGatewayConfig {
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_connection_timeout_minutes: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<ZonedPublicIpReference>,
}

/// User-provided public IP attached to the single-subnet NAT gateway
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PublicIpReference {
    pub name: String,
    pub resource_group: String,
    pub zone: i32,
}

/// User-provided public IP attached to a zonal NAT gateway
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ZonedPublicIpReference {
    pub name: String,
    pub resource_group: String,
}

/// Existing managed identity
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IdentityConfig {
    pub name: String,
    pub resource_group: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr_access: Option<bool>,
}

/// InfrastructureStatus is the provider status of an Infrastructure resource
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InfrastructureStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub networks: NetworkStatus,

    pub resource_group: ResourceGroup,

    #[serde(default)]
    pub availability_sets: Vec<AvailabilitySet>,

    #[serde(default)]
    pub route_tables: Vec<RouteTable>,

    #[serde(default)]
    pub security_groups: Vec<SecurityGroup>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityStatus>,

    #[serde(default)]
    pub zoned: bool,

    #[serde(
        rename = "natGatewayPublicIPMigrated",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub nat_gateway_public_ip_migrated: bool,
}

/// Network status of the infrastructure
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetworkStatus {
    pub vnet: VNetStatus,

    #[serde(default)]
    pub subnets: Vec<Subnet>,

    pub layout: NetworkLayout,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_access_type: Option<OutboundAccessType>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VNetStatus {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Subnet {
    pub name: String,
    pub purpose: Purpose,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub migrated: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AvailabilitySet {
    pub purpose: Purpose,
    pub id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_fault_domains: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_update_domains: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteTable {
    pub purpose: Purpose,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecurityGroup {
    pub purpose: Purpose,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IdentityStatus {
    #[serde(rename = "id")]
    pub id: String,

    #[serde(rename = "clientID")]
    pub client_id: String,

    #[serde(default)]
    pub acr_access: bool,
}

/// Layout of the worker subnets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum NetworkLayout {
    /// One worker subnet shared by all zones
    #[default]
    SingleSubnet,
    /// One worker subnet per zone
    MultipleSubnet,
}

/// Purpose of a status entry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    #[default]
    Nodes,
    Internal,
}

/// How worker nodes reach the internet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OutboundAccessType {
    NatGateway,
    LoadBalancer,
}

/// InfrastructureState is the persisted state of the infrastructure flow
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureState {
    pub api_version: String,
    pub kind: String,

    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Default for InfrastructureState {
    fn default() -> Self {
        Self {
            api_version: GROUP_VERSION.to_string(),
            kind: KIND_INFRASTRUCTURE_STATE.to_string(),
            data: BTreeMap::new(),
        }
    }
}

impl InfrastructureState {
    /// Create a state document from flow data
    pub fn new(data: BTreeMap<String, String>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    /// Whether the group/version/kind header identifies this schema
    pub fn has_native_header(value: &serde_json::Value) -> bool {
        value.get("apiVersion").and_then(|v| v.as_str()) == Some(GROUP_VERSION)
            && value.get("kind").and_then(|v| v.as_str()) == Some(KIND_INFRASTRUCTURE_STATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_single_subnet_config() {
        let raw = json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "InfrastructureConfig",
            "networks": {
                "vnet": {"cidr": "10.250.0.0/16", "ddosProtectionPlanID": "plan"},
                "workers": "10.250.0.0/19",
                "natGateway": {"enabled": true, "idleConnectionTimeoutMinutes": 4},
                "serviceEndpoints": ["Microsoft.Storage"]
            },
            "zoned": true
        });

        let config: InfrastructureConfig = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(config.networks.vnet.ddos_protection_plan_id.as_deref(), Some("plan"));
        assert_eq!(config.networks.workers.as_deref(), Some("10.250.0.0/19"));
        let nat = config.networks.nat_gateway.as_ref().unwrap();
        assert!(nat.enabled);
        assert_eq!(nat.idle_connection_timeout_minutes, Some(4));
        assert!(config.zoned);

        assert_eq!(serde_json::to_value(&config).unwrap(), raw);
    }

    #[test]
    fn test_decode_rejects_unknown_fields() {
        let raw = json!({
            "networks": {"vnet": {"cidr": "10.0.0.0/16"}, "workers": "10.0.0.0/19", "wokers": "x"}
        });
        assert!(serde_json::from_value::<InfrastructureConfig>(raw).is_err());
    }

    #[test]
    fn test_status_wire_names() {
        let status = InfrastructureStatus {
            networks: NetworkStatus {
                vnet: VNetStatus {
                    name: "vnet".into(),
                    resource_group: None,
                },
                subnets: vec![Subnet {
                    name: "nodes".into(),
                    purpose: Purpose::Nodes,
                    zone: Some("1".into()),
                    migrated: true,
                }],
                layout: NetworkLayout::MultipleSubnet,
                outbound_access_type: Some(OutboundAccessType::NatGateway),
            },
            identity: Some(IdentityStatus {
                id: "id".into(),
                client_id: "client".into(),
                acr_access: false,
            }),
            ..Default::default()
        };

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["networks"]["layout"], "MultipleSubnet");
        assert_eq!(value["networks"]["outboundAccessType"], "NatGateway");
        assert_eq!(value["networks"]["subnets"][0]["purpose"], "nodes");
        assert_eq!(value["networks"]["subnets"][0]["migrated"], true);
        assert_eq!(value["identity"]["clientID"], "client");
        assert_eq!(value["availabilitySets"], json!([]));
        assert!(value.get("natGatewayPublicIPMigrated").is_none());
    }

    #[test]
    fn test_state_header() {
        let state = InfrastructureState::default();
        let value = serde_json::to_value(&state).unwrap();
        assert!(InfrastructureState::has_native_header(&value));
        assert!(!InfrastructureState::has_native_header(&json!({"terraformState": "x"})));
    }
}

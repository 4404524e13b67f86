//! Custom resources of the Azure remedy controller
//!
//! The remedy controller heals stuck load balancer and VM bindings. Its
//! resources live in the shoot's seed namespace and carry a finalizer each.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the remedy controller resources
pub const API_GROUP: &str = "azure.remedy.gardener.cloud";

/// Finalizer placed on PublicIPAddress resources
pub const PUBLIC_IP_ADDRESS_FINALIZER: &str = "azure.remedy.gardener.cloud/publicipaddress";
/// Finalizer placed on VirtualMachine resources
pub const VIRTUAL_MACHINE_FINALIZER: &str = "azure.remedy.gardener.cloud/virtualmachine";
/// Finalizer placed on LoadBalancer services in the shoot
pub const SERVICE_FINALIZER: &str = "azure.remedy.gardener.cloud/service";

/// A public IP address observed by the remedy controller
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "azure.remedy.gardener.cloud",
    version = "v1alpha1",
    kind = "PublicIPAddress",
    plural = "publicipaddresses",
    namespaced,
    derive = "Default",
    status = "PublicIPAddressStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PublicIPAddressSpec {
    pub ip_address: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicIPAddressStatus {
    #[serde(default)]
    pub exists: bool,

    #[serde(default, rename = "id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A virtual machine observed by the remedy controller
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "azure.remedy.gardener.cloud",
    version = "v1alpha1",
    kind = "VirtualMachine",
    plural = "virtualmachines",
    namespaced,
    derive = "Default",
    status = "VirtualMachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    pub hostname: String,

    #[serde(rename = "providerID")]
    pub provider_id: String,

    #[serde(default)]
    pub not_ready_or_unreachable: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    #[serde(default)]
    pub exists: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

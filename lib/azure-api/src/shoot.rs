//! Shoot and CloudProfile fragments (core.gardener.cloud/v1beta1)
//!
//! Fields the controllers and webhooks do not interpret are kept in `extra`
//! so a decoded object re-encodes without loss.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::internal::decode;
use crate::v1alpha1::CloudProfileConfig;
use crate::DecodeError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shoot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ShootSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ShootStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootSpec {
    #[serde(default)]
    pub provider: Provider,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<Networking>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_components: Option<SystemComponents>,

    #[serde(default)]
    pub region: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<Kubernetes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hibernation: Option<Hibernation>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    #[serde(rename = "type", default)]
    pub type_: String,

    /// Raw InfrastructureConfig
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_config: Option<Value>,

    /// Raw ControlPlaneConfig
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_config: Option<Value>,

    #[serde(default)]
    pub workers: Vec<Worker>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub name: String,

    #[serde(default)]
    pub maximum: i32,

    #[serde(default)]
    pub minimum: i32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Raw network provider config (untyped)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemComponents {
    #[serde(rename = "nodeLocalDNS", default, skip_serializing_if = "Option::is_none")]
    pub node_local_dns: Option<NodeLocalDns>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeLocalDns {
    #[serde(default)]
    pub enabled: bool,

    #[serde(rename = "forceTCPToClusterDNS", default, skip_serializing_if = "Option::is_none")]
    pub force_tcp_to_cluster_dns: Option<bool>,

    #[serde(rename = "forceTCPToUpstreamDNS", default, skip_serializing_if = "Option::is_none")]
    pub force_tcp_to_upstream_dns: Option<bool>,

    #[serde(
        rename = "disableForwardingToUpstreamDNS",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub disable_forwarding_to_upstream_dns: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kubernetes {
    #[serde(default)]
    pub version: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hibernation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<ShootLastOperation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_hibernated: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootLastOperation {
    #[serde(rename = "type", default)]
    pub type_: String,

    #[serde(default)]
    pub state: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Shoot {
    /// A shoot without worker pools has no infrastructure to mutate
    pub fn is_workerless(&self) -> bool {
        self.spec.provider.workers.is_empty()
    }

    pub fn is_hibernated(&self) -> bool {
        let desired = self
            .spec
            .hibernation
            .as_ref()
            .and_then(|h| h.enabled)
            .unwrap_or(false);
        let actual = self
            .status
            .as_ref()
            .and_then(|s| s.is_hibernated)
            .unwrap_or(false);
        desired && actual
    }

    fn last_operation(&self) -> Option<&ShootLastOperation> {
        self.status.as_ref().and_then(|s| s.last_operation.as_ref())
    }

    /// Migrate in any state, or a Restore that has not succeeded yet
    pub fn is_in_migration_or_restore(&self) -> bool {
        match self.last_operation() {
            Some(op) if op.type_ == "Migrate" => true,
            Some(op) if op.type_ == "Restore" => op.state != "Succeeded",
            _ => false,
        }
    }

    /// Scheduled to a new seed while the migration did not start yet
    pub fn is_rescheduled_before_migration(&self) -> bool {
        let status_seed = self.status.as_ref().and_then(|s| s.seed_name.as_ref());
        let spec_seed = self.spec.seed_name.as_ref();
        let migrating = self
            .last_operation()
            .map(|op| op.type_ == "Migrate")
            .unwrap_or(false);
        match (spec_seed, status_seed) {
            (Some(spec_seed), Some(status_seed)) => spec_seed != status_seed && !migrating,
            _ => false,
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudProfile {
    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: CloudProfileSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudProfileSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CloudProfile {
    pub fn provider_config(&self) -> Result<CloudProfileConfig, DecodeError> {
        decode::cloud_profile_config(self.spec.provider_config.as_ref())
    }
}

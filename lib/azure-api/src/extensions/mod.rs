/// Bindings to the gardener extension resources handled by the Azure provider
///
/// Only the fields read or written by the controllers are modelled.

pub mod cluster;
pub mod control_plane;
pub mod infrastructure;

pub use cluster::{Cluster, ClusterContext};
pub use control_plane::ControlPlane;
pub use infrastructure::Infrastructure;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the extension resources
pub const API_GROUP: &str = "extensions.gardener.cloud";
/// Extension type routed to this provider
pub const EXTENSION_TYPE: &str = "azure";

/// Reference to a secret holding cloud credentials
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SecretReference {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LastOperationType {
    Create,
    Reconcile,
    Delete,
    Migrate,
    Restore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LastOperationState {
    Processing,
    Succeeded,
    Error,
    Failed,
    Pending,
    Aborted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(rename = "type")]
    pub type_: LastOperationType,
    pub state: LastOperationState,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub progress: i32,
    pub last_update_time: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
    #[serde(default, rename = "taskID", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<String>,
    pub last_update_time: String,
}

impl LastOperation {
    pub fn new(
        type_: LastOperationType,
        state: LastOperationState,
        description: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            state,
            description: description.into(),
            progress: if state == LastOperationState::Succeeded { 100 } else { 0 },
            last_update_time: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl LastError {
    pub fn new(description: impl Into<String>, task_id: Option<String>, codes: Vec<String>) -> Self {
        Self {
            description: description.into(),
            task_id,
            codes,
            last_update_time: chrono::Utc::now().to_rfc3339(),
        }
    }
}

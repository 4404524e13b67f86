use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// BackupBucketConfig is the provider config of a BackupBucket resource
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackupBucketConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Immutability policy of the blob container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immutability: Option<ImmutableConfig>,

    /// Storage account key rotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_config: Option<RotationConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImmutableConfig {
    /// Scope of the retention policy, only "bucket" is supported
    pub retention_type: String,

    /// Retention period as a Go-style duration, e.g. "24h"
    pub retention_period: String,

    #[serde(default)]
    pub locked: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RotationConfig {
    pub rotation_period_in_days: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_period_in_days: Option<i32>,
}

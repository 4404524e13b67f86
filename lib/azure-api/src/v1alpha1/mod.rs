/// API version v1alpha1 of the Azure provider configuration types

pub mod backup_bucket;
pub mod cloud_profile;
pub mod control_plane;
pub mod infrastructure;

pub use backup_bucket::BackupBucketConfig;
pub use cloud_profile::CloudProfileConfig;
pub use control_plane::ControlPlaneConfig;
pub use infrastructure::{InfrastructureConfig, InfrastructureState, InfrastructureStatus};

/// API group for Azure provider configuration
pub const API_GROUP: &str = "azure.provider.extensions.gardener.cloud";
/// API version for Azure provider configuration
pub const API_VERSION: &str = "v1alpha1";
/// `apiVersion` value written on every encoded config
pub const GROUP_VERSION: &str = "azure.provider.extensions.gardener.cloud/v1alpha1";

pub const KIND_INFRASTRUCTURE_CONFIG: &str = "InfrastructureConfig";
pub const KIND_INFRASTRUCTURE_STATUS: &str = "InfrastructureStatus";
pub const KIND_INFRASTRUCTURE_STATE: &str = "InfrastructureState";
pub const KIND_CONTROL_PLANE_CONFIG: &str = "ControlPlaneConfig";
pub const KIND_BACKUP_BUCKET_CONFIG: &str = "BackupBucketConfig";
pub const KIND_CLOUD_PROFILE_CONFIG: &str = "CloudProfileConfig";

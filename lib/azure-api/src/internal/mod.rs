//! Internal (canonical) form of the provider configuration
//!
//! Controllers never work on the wire types directly: raw provider configs are
//! decoded against the versioned schema, defaulted, and converted into the types
//! of this module. Statuses travel the opposite way through [`decode::encode_infrastructure_status`].

pub mod backup_bucket;
pub mod control_plane;
mod conversion;
pub mod decode;
pub mod defaults;
pub mod infrastructure;
pub mod validation;

pub use backup_bucket::BackupBucketConfig;
pub use control_plane::ControlPlaneConfig;
pub use decode::DecodeError;
pub use infrastructure::{InfrastructureConfig, InfrastructureStatus};
pub use validation::{validate_infrastructure_config, ValidationError};

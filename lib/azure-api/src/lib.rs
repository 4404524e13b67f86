//! Azure provider API types
//!
//! This library defines the typed model shared by the Azure provider controllers
//! and admission webhooks:
//! - `v1alpha1`: the versioned wire form of the provider configs (InfrastructureConfig,
//!   InfrastructureStatus, InfrastructureState, ControlPlaneConfig, BackupBucketConfig,
//!   CloudProfileConfig)
//! - `internal`: the canonical form the controllers work on, with conversion,
//!   defaulting, decoding and validation
//! - `extensions`: the extension resources (Infrastructure, ControlPlane, Cluster)
//! - `shoot`: the Shoot and CloudProfile fragments read by the controllers and webhooks
//! - `remedy`: the remedy controller's custom resources

pub mod annotations;
pub mod extensions;
pub mod internal;
pub mod remedy;
pub mod shoot;
pub mod v1alpha1;

pub use extensions::{Cluster, ControlPlane, Infrastructure};
pub use internal::{decode, DecodeError};
pub use shoot::{CloudProfile, Shoot};

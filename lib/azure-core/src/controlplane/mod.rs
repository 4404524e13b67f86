//! ControlPlane actuator
//!
//! [`ProviderConfigActuator`] checks the configs a ControlPlane carries;
//! [`RemedyPurgingActuator`] wraps it with the remedy controller cleanup that
//! has to run before the control plane is deleted or migrated.

pub mod actuator;
pub mod purge;
pub mod remedy;

pub use actuator::{ControlPlaneActuator, ProviderConfigActuator};
pub use purge::RemedyPurgingActuator;
pub use remedy::{KubeRemedyClient, KubeShootClientFactory, RemedyClient, RemedyKind, ShootClient, ShootClientFactory};

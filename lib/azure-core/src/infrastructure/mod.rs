//! Infrastructure reconciler
//!
//! Converges an `InfrastructureConfig` into Azure resources through the flow
//! engine. Names of all resources are derived by [`plan::InfrastructurePlan`];
//! the reconcile and delete tasks record what they did on the whiteboard,
//! which is persisted as `status.state` after every task.

pub mod actuator;
pub mod client;
mod context;
pub mod delete;
pub mod migration;
pub mod plan;
pub mod reconcile;
pub mod status;

pub use actuator::{ActuatorOptions, InfrastructureActuator};
pub use client::{InfrastructureClient, KubeInfrastructureClient};
pub use context::FlowContext;
pub use plan::InfrastructurePlan;

//! Reconcilers of the Azure provider extension
//!
//! This library provides:
//! - A flow engine running DAGs of tasks with persisted state
//! - The Infrastructure actuator converging Azure network resources
//! - The ControlPlane actuator with the remedy controller cleanup
//! - Controller configuration and feature gates
//! - Prometheus metrics of operations and flow tasks

pub mod config;
pub mod controlplane;
pub mod error;
pub mod flow;
pub mod infrastructure;
pub mod metrics;

pub use config::{ConfigError, ControllerConfig, FeatureGates};
pub use error::{Error, ErrorCode, Result};
pub use metrics::ControllerMetrics;

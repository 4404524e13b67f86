//! Azure Resource Manager client
//!
//! This library provides:
//! - Credentials and cloud instance selection for ARM
//! - Typed resource models for the network, compute, identity and storage APIs
//! - One capability trait per resource kind, handed out by a [`Factory`]
//! - An HTTP implementation ([`ArmFactory`]) and an in-memory one ([`fake::FakeAzure`])
//! - Retry with exponential backoff

pub mod arm;
pub mod auth;
pub mod cloud;
pub mod error;
pub mod factory;
pub mod fake;
pub mod models;
pub mod retry;

pub use arm::{ArmFactory, ArmFactoryProvider};
pub use auth::ClientAuth;
pub use cloud::{CloudConfiguration, CloudInstance};
pub use error::{AzureError, Result};
pub use factory::{Factory, FactoryProvider};
pub use retry::{retry_with_backoff, RetryConfig};

//! Admission webhook of the Azure provider extension
//!
//! This library provides:
//! - The Shoot mutator defaulting NAT gateways, the cilium overlay and NodeLocalDNS
//! - The AdmissionReview handler returning the mutation as a JSON patch
//! - Prometheus metrics of the reviews
//! - TLS configuration of the webhook listener

pub mod error;
pub mod metrics;
pub mod mutator;
pub mod tls;
pub mod webhook;

pub use error::{AdmissionError, Result};
pub use metrics::AdmissionMetrics;
pub use mutator::mutate_shoot;
pub use tls::TlsServerConfig;
pub use webhook::{handle_request, route, ShootMutator, HEALTHZ_PATH, METRICS_PATH, MUTATE_SHOOT_PATH};

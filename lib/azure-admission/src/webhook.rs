//! Shoot mutation webhook
//!
//! Serves AdmissionReview requests for Shoots. The mutated shoot is diffed
//! against the submitted one and returned as a JSON patch. Request counts and
//! patch sizes are exported on `/metrics`.

use std::sync::Arc;

use azure_api::Shoot;
use azure_core::FeatureGates;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info, warn};

use crate::error::{AdmissionError, Result};
use crate::metrics::AdmissionMetrics;
use crate::mutator::mutate_shoot;

pub const MUTATE_SHOOT_PATH: &str = "/webhooks/mutate-shoot";
pub const HEALTHZ_PATH: &str = "/healthz";
pub const METRICS_PATH: &str = "/metrics";

const PROVIDER_TYPE: &str = "azure";

/// Admission handler for Azure shoots
#[derive(Clone, Debug)]
pub struct ShootMutator {
    gates: FeatureGates,
    metrics: AdmissionMetrics,
}

impl ShootMutator {
    pub fn new(gates: FeatureGates, metrics: AdmissionMetrics) -> Self {
        Self { gates, metrics }
    }

    pub fn metrics(&self) -> &AdmissionMetrics {
        &self.metrics
    }

    /// Answer one review
    pub fn review(&self, review: AdmissionReview<DynamicObject>) -> AdmissionReview<DynamicObject> {
        let request: AdmissionRequest<DynamicObject> = match review.try_into() {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "Failed to parse admission request");
                self.metrics.requests_total.with_label_values(&["UNKNOWN"]).inc();
                self.metrics.denials_total.with_label_values(&["UNKNOWN"]).inc();
                return AdmissionResponse::invalid(e.to_string()).into_review();
            }
        };
        let operation = format!("{:?}", request.operation).to_uppercase();
        self.metrics.requests_total.with_label_values(&[&operation]).inc();

        let response = match self.mutate(&request) {
            Ok(Some(patch)) => {
                info!(uid = %request.uid, name = %request.name, operations = patch.0.len(), "Patching shoot");
                if let Ok(encoded) = serde_json::to_vec(&patch) {
                    self.metrics.patch_size_bytes.observe(encoded.len() as f64);
                }
                AdmissionResponse::from(&request).with_patch(patch).unwrap_or_else(|e| {
                    error!(uid = %request.uid, error = %e, "Failed to serialize patch");
                    AdmissionResponse::from(&request).deny(format!("patch serialization error: {}", e))
                })
            }
            Ok(None) => AdmissionResponse::from(&request),
            Err(e) => {
                warn!(uid = %request.uid, name = %request.name, error = %e, "Rejecting shoot");
                AdmissionResponse::from(&request).deny(e.to_string())
            }
        };
        if !response.allowed {
            self.metrics.denials_total.with_label_values(&[&operation]).inc();
        }
        response.into_review()
    }

    fn mutate(&self, request: &AdmissionRequest<DynamicObject>) -> Result<Option<json_patch::Patch>> {
        let Some(object) = request.object.as_ref() else {
            debug!(uid = %request.uid, "No object in request");
            return Ok(None);
        };
        let original = serde_json::to_value(object)?;
        let shoot: Shoot = serde_json::from_value(original)?;
        if shoot.spec.provider.type_ != PROVIDER_TYPE {
            debug!(uid = %request.uid, provider = %shoot.spec.provider.type_, "Not an Azure shoot");
            return Ok(None);
        }
        let old: Option<Shoot> = request
            .old_object
            .as_ref()
            .map(|o| serde_json::to_value(o).and_then(serde_json::from_value))
            .transpose()?;

        let mut mutated = shoot.clone();
        mutate_shoot(&self.gates, &mut mutated, old.as_ref())?;

        let patch = json_patch::diff(&serde_json::to_value(&shoot)?, &serde_json::to_value(&mutated)?);
        Ok((!patch.0.is_empty()).then_some(patch))
    }
}

/// Dispatch a request that was read in full
pub fn route(mutator: &ShootMutator, method: &Method, path: &str, body: &[u8]) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, HEALTHZ_PATH) => text(StatusCode::OK, "ok"),
        (&Method::GET, METRICS_PATH) => match mutator.metrics().gather() {
            Ok(metrics) => text(StatusCode::OK, &metrics),
            Err(e) => {
                warn!(error = %e, "Failed to gather metrics");
                text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics\n")
            }
        },
        (&Method::POST, MUTATE_SHOOT_PATH) => match parse_review(body) {
            Ok(review) => match serde_json::to_vec(&mutator.review(review)) {
                Ok(body) => Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "application/json")
                    .body(Full::new(Bytes::from(body)))
                    .unwrap_or_else(|_| text(StatusCode::INTERNAL_SERVER_ERROR, "response")),
                Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
            },
            Err(e) => {
                warn!(error = %e, "Bad admission review");
                text(StatusCode::BAD_REQUEST, &e.to_string())
            }
        },
        (_, MUTATE_SHOOT_PATH) | (_, HEALTHZ_PATH) | (_, METRICS_PATH) => text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn parse_review(body: &[u8]) -> Result<AdmissionReview<DynamicObject>> {
    serde_json::from_slice(body).map_err(|e| AdmissionError::InvalidReview(e.to_string()))
}

fn text(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}

/// hyper service entry point
pub async fn handle_request(
    req: Request<Incoming>,
    mutator: Arc<ShootMutator>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    debug!(method = %parts.method, path = %parts.uri.path(), bytes = body.len(), "Admission request");
    Ok(route(&mutator, &parts.method, parts.uri.path(), &body))
}

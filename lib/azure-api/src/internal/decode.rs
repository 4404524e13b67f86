//! Decoding of raw provider configs against the versioned schema

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::v1alpha1::{self, GROUP_VERSION};

use super::{defaults, BackupBucketConfig, ControlPlaneConfig, InfrastructureConfig, InfrastructureStatus};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{0} is missing")]
    Missing(&'static str),

    #[error("unsupported apiVersion {found:?} for {kind}, expected {GROUP_VERSION:?}")]
    UnsupportedVersion { kind: &'static str, found: String },

    #[error("unexpected kind {found:?}, expected {expected:?}")]
    UnexpectedKind { expected: &'static str, found: String },

    #[error("could not decode {kind}: {source}")]
    Json {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Strictly decode the wire form of `kind`. A present apiVersion/kind header must match.
pub fn external<T: DeserializeOwned>(raw: &Value, kind: &'static str) -> Result<T, DecodeError> {
    if let Some(api_version) = raw.get("apiVersion").and_then(Value::as_str) {
        if api_version != GROUP_VERSION {
            return Err(DecodeError::UnsupportedVersion {
                kind,
                found: api_version.to_string(),
            });
        }
    }
    if let Some(found) = raw.get("kind").and_then(Value::as_str) {
        if found != kind {
            return Err(DecodeError::UnexpectedKind {
                expected: kind,
                found: found.to_string(),
            });
        }
    }
    serde_json::from_value(raw.clone()).map_err(|source| DecodeError::Json { kind, source })
}

/// Decode, default and convert an InfrastructureConfig
pub fn infrastructure_config(raw: Option<&Value>) -> Result<InfrastructureConfig, DecodeError> {
    let raw = raw.ok_or(DecodeError::Missing("infrastructure providerConfig"))?;
    let mut config: v1alpha1::InfrastructureConfig =
        external(raw, v1alpha1::KIND_INFRASTRUCTURE_CONFIG)?;
    defaults::infrastructure_config(&mut config);
    Ok(config.into())
}

pub fn infrastructure_status(raw: &Value) -> Result<InfrastructureStatus, DecodeError> {
    let status: v1alpha1::InfrastructureStatus =
        external(raw, v1alpha1::KIND_INFRASTRUCTURE_STATUS)?;
    Ok(status.into())
}

pub fn encode_infrastructure_status(status: &InfrastructureStatus) -> Result<Value, DecodeError> {
    let external: v1alpha1::InfrastructureStatus = status.clone().into();
    serde_json::to_value(external).map_err(|source| DecodeError::Json {
        kind: v1alpha1::KIND_INFRASTRUCTURE_STATUS,
        source,
    })
}

/// Decode a ControlPlaneConfig; an absent config yields the defaults
pub fn control_plane_config(raw: Option<&Value>) -> Result<ControlPlaneConfig, DecodeError> {
    let mut config: v1alpha1::ControlPlaneConfig = match raw {
        Some(raw) => external(raw, v1alpha1::KIND_CONTROL_PLANE_CONFIG)?,
        None => Default::default(),
    };
    defaults::control_plane_config(&mut config);
    Ok(config.into())
}

pub fn backup_bucket_config(raw: Option<&Value>) -> Result<BackupBucketConfig, DecodeError> {
    let config: v1alpha1::BackupBucketConfig = match raw {
        Some(raw) => external(raw, v1alpha1::KIND_BACKUP_BUCKET_CONFIG)?,
        None => Default::default(),
    };
    Ok(config.into())
}

/// CloudProfileConfig has no internal form; unknown fields are tolerated.
pub fn cloud_profile_config(raw: Option<&Value>) -> Result<v1alpha1::CloudProfileConfig, DecodeError> {
    match raw {
        Some(raw) => external(raw, v1alpha1::KIND_CLOUD_PROFILE_CONFIG),
        None => Ok(Default::default()),
    }
}

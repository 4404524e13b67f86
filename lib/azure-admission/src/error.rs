use azure_api::DecodeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdmissionError>;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("could not decode infrastructureConfig: {0}")]
    InfrastructureConfig(#[source] DecodeError),

    #[error("could not decode networking.providerConfig: {0}")]
    NetworkConfig(String),

    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

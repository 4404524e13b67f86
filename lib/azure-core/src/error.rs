use std::time::Duration;

use azure_api::internal::ValidationError;
use azure_api::DecodeError;
use azure_client::AzureError;
use thiserror::Error;

use crate::flow::FlowError;

pub type Result<T> = std::result::Result<T, Error>;

/// Classification codes surfaced in `status.lastError.codes`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Unauthorized,
    Unauthenticated,
    QuotaExceeded,
    Dependencies,
    RetryableDependencies,
    ConfigurationProblem,
    Generic,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "ERR_INFRA_UNAUTHORIZED",
            Self::Unauthenticated => "ERR_INFRA_UNAUTHENTICATED",
            Self::QuotaExceeded => "ERR_INFRA_QUOTA_EXCEEDED",
            Self::Dependencies => "ERR_INFRA_DEPENDENCIES",
            Self::RetryableDependencies => "ERR_RETRYABLE_INFRA_DEPENDENCIES",
            Self::ConfigurationProblem => "ERR_CONFIGURATION_PROBLEM",
            Self::Generic => "ERR_INFRA_GENERIC",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// An Azure call failed; `action` names what was attempted
    #[error("failed to {action}: {source}")]
    Azure {
        action: String,
        #[source]
        source: AzureError,
    },

    #[error("invalid provider config: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A resource the configuration refers to does not exist
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not a failure: the caller should come back after `after`
    #[error("requeue after {after:?}: {reason}")]
    RequeueAfter { after: Duration, reason: String },

    #[error("operation canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl Error {
    pub fn azure(action: impl Into<String>, source: AzureError) -> Self {
        Self::Azure {
            action: action.into(),
            source,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn missing_dependency(msg: impl Into<String>) -> Self {
        Self::MissingDependency(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn requeue_after(after: Duration, reason: impl Into<String>) -> Self {
        Self::RequeueAfter {
            after,
            reason: reason.into(),
        }
    }

    /// The Azure error at the root of this error, looking through flow tasks
    pub fn azure_source(&self) -> Option<&AzureError> {
        match self {
            Self::Azure { source, .. } => Some(source),
            Self::Flow(FlowError::Task { source, .. }) => source.azure_source(),
            _ => None,
        }
    }

    /// Codes for `status.lastError.codes`. Requeues and cancellation carry none.
    pub fn codes(&self) -> Vec<ErrorCode> {
        match self {
            Self::Azure { source, .. } => vec![classify(source)],
            Self::Decode(_) | Self::Configuration(_) => vec![ErrorCode::ConfigurationProblem],
            Self::MissingDependency(_) => vec![ErrorCode::Dependencies],
            Self::Flow(FlowError::Task { source, .. }) => source.codes(),
            Self::Flow(FlowError::InvalidGraph { .. }) => vec![ErrorCode::Generic],
            Self::Flow(FlowError::Timeout { .. }) => vec![ErrorCode::Generic],
            Self::Flow(FlowError::Canceled) | Self::Canceled | Self::RequeueAfter { .. } => {
                Vec::new()
            }
            Self::Kube(_) | Self::Serialization(_) | Self::Internal(_) => vec![ErrorCode::Generic],
        }
    }

    /// Name of the flow task that failed, if any
    pub fn task(&self) -> Option<&str> {
        match self {
            Self::Flow(FlowError::Task { task, .. }) | Self::Flow(FlowError::Timeout { task, .. }) => {
                Some(task.as_str())
            }
            _ => None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled | Self::Flow(FlowError::Canceled))
    }

    /// Optimistic-locking conflict from the API server
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(response)) if response.code == 409)
    }

    pub fn is_unauthenticated_or_unauthorized(&self) -> bool {
        self.azure_source()
            .map(|e| e.is_unauthenticated() || e.is_unauthorized())
            .unwrap_or(false)
    }
}

/// Attach the attempted action to Azure errors
pub trait AzureResultExt<T> {
    fn with_action<F>(self, action: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> AzureResultExt<T> for std::result::Result<T, AzureError> {
    fn with_action<F>(self, action: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| Error::Azure {
            action: action(),
            source,
        })
    }
}

fn classify(error: &AzureError) -> ErrorCode {
    if error.is_unauthenticated() {
        ErrorCode::Unauthenticated
    } else if error.is_unauthorized() {
        ErrorCode::Unauthorized
    } else if error.is_quota_exceeded() {
        ErrorCode::QuotaExceeded
    } else if error.is_retryable_dependency() {
        ErrorCode::RetryableDependencies
    } else if error.is_dependency() {
        ErrorCode::Dependencies
    } else {
        ErrorCode::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azure_errors_are_classified() {
        let cases = [
            (AzureError::response(401, "InvalidAuthenticationToken", "expired"), ErrorCode::Unauthenticated),
            (AzureError::response(403, "AuthorizationFailed", "no access"), ErrorCode::Unauthorized),
            (
                AzureError::response(409, "OperationNotAllowed", "quota exceeded for cores"),
                ErrorCode::QuotaExceeded,
            ),
            (AzureError::response(400, "InUseSubnetCannotBeDeleted", "in use"), ErrorCode::Dependencies),
            (
                AzureError::response(409, "AnotherOperationInProgress", "busy"),
                ErrorCode::RetryableDependencies,
            ),
            (AzureError::response(500, "InternalServerError", "boom"), ErrorCode::Generic),
        ];

        for (source, code) in cases {
            let err = Error::azure("ensure NAT gateway nat", source);
            assert_eq!(err.codes(), vec![code], "{}", err);
        }
    }

    #[test]
    fn test_missing_credentials_are_unauthenticated() {
        let err = Error::azure(
            "read credentials",
            AzureError::Authentication("clientSecret is missing".into()),
        );
        assert_eq!(err.codes(), vec![ErrorCode::Unauthenticated]);
        assert!(err.is_unauthenticated_or_unauthorized());
    }

    #[test]
    fn test_task_errors_keep_their_code_and_name() {
        let err: Error = FlowError::Task {
            task: "EnsureNATGateways".into(),
            source: Box::new(Error::azure(
                "ensure NAT gateway shoot--foo--az-nat-gateway",
                AzureError::response(403, "AuthorizationFailed", "denied"),
            )),
        }
        .into();

        assert_eq!(err.codes(), vec![ErrorCode::Unauthorized]);
        assert_eq!(err.task(), Some("EnsureNATGateways"));
        assert!(err.to_string().contains("EnsureNATGateways"));
        assert!(err.to_string().contains("shoot--foo--az-nat-gateway"));
    }

    #[test]
    fn test_requeue_and_cancel_carry_no_codes() {
        assert!(Error::requeue_after(Duration::from_secs(60), "waiting").codes().is_empty());
        assert!(Error::Canceled.codes().is_empty());
        assert!(Error::from(FlowError::Canceled).is_canceled());
    }

    #[test]
    fn test_configuration_problems() {
        let err = Error::from(ValidationError(vec!["networks.workers: invalid CIDR".into()]));
        assert_eq!(err.codes(), vec![ErrorCode::ConfigurationProblem]);
        assert_eq!(ErrorCode::ConfigurationProblem.to_string(), "ERR_CONFIGURATION_PROBLEM");
    }
}

//! Azure error type and classification

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AzureError>;

/// Errors returned by the Azure clients
#[derive(Debug, Error)]
pub enum AzureError {
    /// ARM answered with a non-success status
    #[error("azure responded with status {status} ({code}): {message}")]
    Response {
        status: u16,
        code: String,
        message: String,
    },

    /// Credentials are missing or were rejected by the identity platform
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A long-running operation reached a terminal state other than success
    #[error("operation {operation} finished with status {status}: {message}")]
    OperationFailed {
        operation: String,
        status: String,
        message: String,
    },

    /// A long-running operation did not finish in time
    #[error("operation {0} did not complete in time")]
    OperationTimeout(String),

    #[error("invalid resource ID: {0}")]
    InvalidResourceId(String),

    #[error("unknown cloud instance: {0}")]
    UnknownCloud(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

const UNAUTHORIZED_CODES: &[&str] = &[
    "AuthorizationFailed",
    "LinkedAuthorizationFailed",
    "InvalidClientTokenId",
    "SubscriptionNotFound",
    "ReadOnlyDisabledSubscription",
];

const UNAUTHENTICATED_CODES: &[&str] = &[
    "InvalidAuthenticationToken",
    "InvalidAuthenticationTokenTenant",
    "ExpiredAuthenticationToken",
    "AuthenticationFailed",
    "invalid_client",
    "invalid_grant",
    "unauthorized_client",
];

const QUOTA_CODES: &[&str] = &[
    "QuotaExceeded",
    "OperationNotAllowed",
    "PublicIPCountLimitReached",
];

const DEPENDENCY_CODES: &[&str] = &[
    "InUseSubnetCannotBeDeleted",
    "InUseNetworkSecurityGroupCannotBeDeleted",
    "InUseRouteTableCannotBeDeleted",
    "InUseNatGatewayCannotBeDeleted",
    "PublicIPAddressInUse",
    "SubnetInUse",
    "VnetInUse",
    "InvalidResourceReference",
    "ResourceGroupBeingDeleted",
];

const RETRYABLE_DEPENDENCY_CODES: &[&str] = &[
    "AnotherOperationInProgress",
    "RetryableError",
    "Conflict",
    "ReferencedResourceNotProvisioned",
];

const NOT_FOUND_CODES: &[&str] = &["ResourceNotFound", "ResourceGroupNotFound", "NotFound"];

impl AzureError {
    pub fn response(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Response {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// The ARM error code, if the error carries one
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Response { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    fn code_in(&self, codes: &[&str]) -> bool {
        self.code()
            .map(|code| codes.iter().any(|c| c.eq_ignore_ascii_case(code)))
            .unwrap_or(false)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404) || self.code_in(NOT_FOUND_CODES)
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Authentication(_))
            || self.status() == Some(401)
            || self.code_in(UNAUTHENTICATED_CODES)
    }

    pub fn is_unauthorized(&self) -> bool {
        (self.status() == Some(403) && !self.is_quota_exceeded()) || self.code_in(UNAUTHORIZED_CODES)
    }

    pub fn is_quota_exceeded(&self) -> bool {
        if self.code_in(QUOTA_CODES) {
            return true;
        }
        match self {
            Self::Response { message, .. } => message.to_ascii_lowercase().contains("quota"),
            _ => false,
        }
    }

    /// Another resource still references the target
    pub fn is_dependency(&self) -> bool {
        self.code_in(DEPENDENCY_CODES)
    }

    /// Dependency conflict expected to clear up without user action
    pub fn is_retryable_dependency(&self) -> bool {
        self.code_in(RETRYABLE_DEPENDENCY_CODES)
    }

    /// Throttling, server-side failures and transport errors
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Response { status, .. } => *status == 429 || *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::OperationTimeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_by_status_and_code() {
        assert!(AzureError::response(404, "Whatever", "gone").is_not_found());
        assert!(AzureError::response(400, "ResourceGroupNotFound", "gone").is_not_found());
        assert!(!AzureError::response(409, "Conflict", "busy").is_not_found());
    }

    #[test]
    fn test_credential_failures() {
        let err = AzureError::response(401, "InvalidAuthenticationToken", "bad token");
        assert!(err.is_unauthenticated());
        assert!(!err.is_unauthorized());

        let err = AzureError::response(403, "AuthorizationFailed", "no access");
        assert!(err.is_unauthorized());

        assert!(AzureError::Authentication("missing clientID".into()).is_unauthenticated());
    }

    #[test]
    fn test_quota_is_not_unauthorized() {
        let err = AzureError::response(403, "OperationNotAllowed", "Operation results in exceeding quota limits");
        assert!(err.is_quota_exceeded());
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn test_dependencies() {
        assert!(AzureError::response(400, "InUseSubnetCannotBeDeleted", "in use").is_dependency());
        let busy = AzureError::response(409, "AnotherOperationInProgress", "busy");
        assert!(busy.is_retryable_dependency());
        assert!(!busy.is_dependency());
    }

    #[test]
    fn test_transient() {
        assert!(AzureError::response(429, "TooManyRequests", "slow down").is_transient());
        assert!(AzureError::response(503, "ServiceUnavailable", "later").is_transient());
        assert!(!AzureError::response(400, "InvalidParameter", "bad").is_transient());
    }
}

//! Service principal credentials read from the shoot's cloud provider secret

use std::fmt;

use k8s_openapi::api::core::v1::Secret;

use crate::error::{AzureError, Result};

pub const CLIENT_ID_KEY: &str = "clientID";
pub const CLIENT_SECRET_KEY: &str = "clientSecret";
pub const SUBSCRIPTION_ID_KEY: &str = "subscriptionID";
pub const TENANT_ID_KEY: &str = "tenantID";

/// Service principal credentials for one subscription
#[derive(Clone, PartialEq, Eq)]
pub struct ClientAuth {
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
    pub tenant_id: String,
}

impl fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAuth")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

impl ClientAuth {
    /// Read the credentials from a secret. Missing or empty keys are an
    /// authentication failure.
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let data = secret.data.as_ref();
        let read = |key: &str| -> Result<String> {
            let value = data
                .and_then(|d| d.get(key))
                .map(|v| String::from_utf8_lossy(&v.0).trim().to_string())
                .unwrap_or_default();
            if value.is_empty() {
                return Err(AzureError::Authentication(format!(
                    "secret {} does not contain a value for {}",
                    name, key
                )));
            }
            Ok(value)
        };

        Ok(Self {
            client_id: read(CLIENT_ID_KEY)?,
            client_secret: read(CLIENT_SECRET_KEY)?,
            subscription_id: read(SUBSCRIPTION_ID_KEY)?,
            tenant_id: read(TENANT_ID_KEY)?,
        })
    }
}

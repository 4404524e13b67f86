//! Azure cloud instances and their endpoints

use std::fmt;
use std::str::FromStr;

use crate::error::AzureError;

/// Azure cloud instance a subscription lives in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CloudInstance {
    #[default]
    AzurePublic,
    AzureChina,
    AzureGovernment,
}

/// Endpoints of one cloud instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudConfiguration {
    pub instance: CloudInstance,
    /// Azure Resource Manager base URL
    pub resource_manager: String,
    /// Microsoft identity platform base URL
    pub authority_host: String,
    /// DNS suffix of storage account endpoints
    pub storage_suffix: String,
}

impl CloudInstance {
    /// Derive the instance from the region name
    pub fn from_region(region: &str) -> Self {
        let region = region.to_ascii_lowercase();
        if region.starts_with("china") {
            Self::AzureChina
        } else if region.starts_with("usgov") || region.starts_with("usdod") {
            Self::AzureGovernment
        } else {
            Self::AzurePublic
        }
    }

    /// An explicitly configured instance name wins over the region
    pub fn select(configured: Option<&str>, region: &str) -> Result<Self, AzureError> {
        match configured {
            Some(name) if !name.is_empty() => name.parse(),
            _ => Ok(Self::from_region(region)),
        }
    }

    pub fn configuration(&self) -> CloudConfiguration {
        let (resource_manager, authority_host, storage_suffix) = match self {
            Self::AzurePublic => (
                "https://management.azure.com",
                "https://login.microsoftonline.com",
                "core.windows.net",
            ),
            Self::AzureChina => (
                "https://management.chinacloudapi.cn",
                "https://login.chinacloudapi.cn",
                "core.chinacloudapi.cn",
            ),
            Self::AzureGovernment => (
                "https://management.usgovcloudapi.net",
                "https://login.microsoftonline.us",
                "core.usgovcloudapi.net",
            ),
        };
        CloudConfiguration {
            instance: *self,
            resource_manager: resource_manager.to_string(),
            authority_host: authority_host.to_string(),
            storage_suffix: storage_suffix.to_string(),
        }
    }
}

impl FromStr for CloudInstance {
    type Err = AzureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "azurepublic" | "azurepubliccloud" => Ok(Self::AzurePublic),
            "azurechina" | "azurechinacloud" => Ok(Self::AzureChina),
            "azuregovernment" | "azureusgovernment" | "azureusgovernmentcloud" => {
                Ok(Self::AzureGovernment)
            }
            _ => Err(AzureError::UnknownCloud(s.to_string())),
        }
    }
}

impl fmt::Display for CloudInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AzurePublic => "AzurePublic",
            Self::AzureChina => "AzureChina",
            Self::AzureGovernment => "AzureGovernment",
        };
        f.write_str(name)
    }
}

impl CloudConfiguration {
    /// OAuth scope for ARM tokens
    pub fn token_scope(&self) -> String {
        format!("{}/.default", self.resource_manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_region() {
        assert_eq!(CloudInstance::from_region("westeurope"), CloudInstance::AzurePublic);
        assert_eq!(CloudInstance::from_region("chinanorth2"), CloudInstance::AzureChina);
        assert_eq!(CloudInstance::from_region("usgovvirginia"), CloudInstance::AzureGovernment);
    }

    #[test]
    fn test_configured_name_wins() {
        let instance = CloudInstance::select(Some("AzureChina"), "westeurope").unwrap();
        assert_eq!(instance, CloudInstance::AzureChina);
        assert_eq!(
            CloudInstance::select(None, "westeurope").unwrap(),
            CloudInstance::AzurePublic
        );
        assert!(CloudInstance::select(Some("Mars"), "westeurope").is_err());
    }

    #[test]
    fn test_configuration() {
        let config = CloudInstance::AzureGovernment.configuration();
        assert_eq!(config.resource_manager, "https://management.usgovcloudapi.net");
        assert_eq!(config.token_scope(), "https://management.usgovcloudapi.net/.default");
    }
}

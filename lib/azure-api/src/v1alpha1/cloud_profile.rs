use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CloudProfileConfig is the provider config of a CloudProfile.
///
/// Only the fields read by the controllers are modelled; unknown fields
/// (machine images, machine types, ...) are ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudProfileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub count_fault_domains: Vec<DomainCount>,

    #[serde(default)]
    pub count_update_domains: Vec<DomainCount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_configuration: Option<CloudConfiguration>,
}

/// Platform domain count of a region
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DomainCount {
    pub region: String,
    pub count: i32,
}

/// Azure cloud instance selector, e.g. "AzurePublic"
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CloudConfiguration {
    pub name: String,
}

impl CloudProfileConfig {
    /// Fault domain count configured for `region`
    pub fn fault_domain_count(&self, region: &str) -> Option<i32> {
        find_count(&self.count_fault_domains, region)
    }

    /// Update domain count configured for `region`
    pub fn update_domain_count(&self, region: &str) -> Option<i32> {
        find_count(&self.count_update_domains, region)
    }
}

fn find_count(counts: &[DomainCount], region: &str) -> Option<i32> {
    counts.iter().find(|c| c.region == region).map(|c| c.count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_counts_by_region() {
        let config: CloudProfileConfig = serde_json::from_value(serde_json::json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "CloudProfileConfig",
            "countFaultDomains": [{"region": "westeurope", "count": 3}],
            "countUpdateDomains": [{"region": "westeurope", "count": 5}],
            "machineImages": []
        }))
        .unwrap();

        assert_eq!(config.fault_domain_count("westeurope"), Some(3));
        assert_eq!(config.update_domain_count("westeurope"), Some(5));
        assert_eq!(config.fault_domain_count("eastus"), None);
    }
}

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::shoot::{CloudProfile, Shoot};
use crate::DecodeError;

/// Cluster carries the garden resources of a shoot into the seed (cluster-scoped,
/// named after the shoot's seed namespace)
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "extensions.gardener.cloud",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Raw CloudProfile
    pub cloud_profile: serde_json::Value,

    /// Raw Seed
    #[serde(default)]
    pub seed: serde_json::Value,

    /// Raw Shoot
    pub shoot: serde_json::Value,
}

/// Decoded view of a Cluster resource
#[derive(Clone, Debug, Default)]
pub struct ClusterContext {
    pub shoot: Shoot,
    pub cloud_profile: CloudProfile,
    pub seed: Option<serde_json::Value>,
}

impl ClusterContext {
    pub fn from_cluster(cluster: &Cluster) -> Result<Self, DecodeError> {
        let shoot = serde_json::from_value(cluster.spec.shoot.clone())
            .map_err(|source| DecodeError::Json { kind: "Shoot", source })?;
        let cloud_profile = serde_json::from_value(cluster.spec.cloud_profile.clone())
            .map_err(|source| DecodeError::Json { kind: "CloudProfile", source })?;
        let seed = match &cluster.spec.seed {
            serde_json::Value::Null => None,
            seed => Some(seed.clone()),
        };
        Ok(Self {
            shoot,
            cloud_profile,
            seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cluster_context_decodes_shoot_and_profile() {
        let cluster = Cluster::new(
            "shoot--foo--az",
            ClusterSpec {
                cloud_profile: json!({
                    "metadata": {"name": "azure"},
                    "spec": {"providerConfig": {"countFaultDomains": [{"region": "westeurope", "count": 3}]}}
                }),
                seed: serde_json::Value::Null,
                shoot: json!({
                    "metadata": {"name": "az", "namespace": "garden-foo"},
                    "spec": {"region": "westeurope", "provider": {"type": "azure", "workers": []}}
                }),
            },
        );

        let ctx = ClusterContext::from_cluster(&cluster).unwrap();
        assert_eq!(ctx.shoot.spec.region, "westeurope");
        assert!(ctx.seed.is_none());
        assert!(ctx.cloud_profile.spec.provider_config.is_some());
    }
}

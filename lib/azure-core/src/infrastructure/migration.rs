//! Hand-over from the legacy Terraform-based reconciler
//!
//! The legacy reconciler stored its own state document in `status.state` and
//! kept its configuration in seed ConfigMaps and Secrets. Once the flow has
//! reconciled successfully these artifacts are removed.

use azure_api::v1alpha1::InfrastructureState;
use serde_json::Value;

/// Finalizer the legacy reconciler placed on the Infrastructure
pub const LEGACY_FINALIZER: &str = "gardener.cloud/terraformer";

/// Where the persisted state of an Infrastructure came from
#[derive(Clone, Debug, PartialEq)]
pub enum StateOrigin {
    /// No usable state
    Absent,
    Native(InfrastructureState),
    /// Written by the legacy reconciler
    Legacy,
}

pub fn classify_state(raw: Option<&Value>) -> StateOrigin {
    let Some(raw) = raw else {
        return StateOrigin::Absent;
    };
    if InfrastructureState::has_native_header(raw) {
        return match serde_json::from_value(raw.clone()) {
            Ok(state) => StateOrigin::Native(state),
            // Unreadable, so assume resources may exist
            Err(_) => StateOrigin::Legacy,
        };
    }
    let empty = match raw {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    };
    if empty {
        StateOrigin::Absent
    } else {
        StateOrigin::Legacy
    }
}

/// Seed objects the legacy reconciler kept for an Infrastructure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyArtifacts {
    pub config_maps: Vec<String>,
    pub secrets: Vec<String>,
}

impl LegacyArtifacts {
    pub fn for_infrastructure(name: &str) -> Self {
        Self {
            config_maps: vec![format!("{}.infra.tf-config", name), format!("{}.infra.tf-state", name)],
            secrets: vec![format!("{}.infra.tf-vars", name)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_state() {
        assert_eq!(classify_state(None), StateOrigin::Absent);
        assert_eq!(classify_state(Some(&json!({}))), StateOrigin::Absent);
        assert_eq!(classify_state(Some(&json!(""))), StateOrigin::Absent);

        let native = json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "InfrastructureState",
            "data": {"created-resources-exist": "true"}
        });
        match classify_state(Some(&native)) {
            StateOrigin::Native(state) => {
                assert_eq!(state.data.get("created-resources-exist").map(String::as_str), Some("true"))
            }
            other => panic!("unexpected {:?}", other),
        }

        let broken = json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "InfrastructureState",
            "data": ["created-resources-exist"]
        });
        assert_eq!(classify_state(Some(&broken)), StateOrigin::Legacy);

        let legacy = json!({"version": 4, "resources": []});
        assert_eq!(classify_state(Some(&legacy)), StateOrigin::Legacy);
        assert_eq!(classify_state(Some(&json!("H4sIAAAA"))), StateOrigin::Legacy);
    }

    #[test]
    fn test_artifact_names() {
        let artifacts = LegacyArtifacts::for_infrastructure("az");
        assert_eq!(artifacts.config_maps, vec!["az.infra.tf-config", "az.infra.tf-state"]);
        assert_eq!(artifacts.secrets, vec!["az.infra.tf-vars"]);
    }
}

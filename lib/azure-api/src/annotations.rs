//! Annotation keys recognized on Shoot and Infrastructure resources

/// Forces the native flow reconciler. The flow is the only reconciler, so the
/// annotation is accepted but has no further effect.
pub const USE_FLOW: &str = "azure.provider.extensions.gardener.cloud/use-flow";

/// Legacy Terraform reconciler opt-in. Routed elsewhere by the host.
pub const USE_TERRAFORMER: &str = "azure.provider.extensions.gardener.cloud/use-terraformer";

/// Sticky marker stamped by the shoot mutator once it started defaulting NAT gateways.
pub const MUTATE_NAT_CONFIG: &str = "azure.provider.extensions.gardener.cloud/mutate-nat-config";

/// Shoot opts into VMSS Flex (VMO); availability sets are not created.
pub const VMO: &str = "alpha.azure.provider.extensions.gardener.cloud/vmo";

/// Disables the remedy controller add-on for the shoot.
pub const DISABLE_REMEDY_CONTROLLER: &str =
    "azure.provider.extensions.gardener.cloud/disable-remedy-controller";

/// Names the zone that inherits the subnet of a former single-subnet layout.
pub const NETWORK_LAYOUT_ZONE_MIGRATION: &str =
    "azure.provider.extensions.gardener.cloud/network-layout-zone-migration";

/// Returns true if `annotations` carries `key` with the literal value `"true"`.
pub fn is_true(
    annotations: Option<&std::collections::BTreeMap<String, String>>,
    key: &str,
) -> bool {
    annotations
        .and_then(|a| a.get(key))
        .map(|v| v == "true")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_is_true() {
        let mut annotations = BTreeMap::new();
        annotations.insert(VMO.to_string(), "true".to_string());
        annotations.insert(USE_FLOW.to_string(), "yes".to_string());

        assert!(is_true(Some(&annotations), VMO));
        assert!(!is_true(Some(&annotations), USE_FLOW));
        assert!(!is_true(Some(&annotations), MUTATE_NAT_CONFIG));
        assert!(!is_true(None, VMO));
    }
}

//! Shared, persisted state of a flow run

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use azure_api::v1alpha1::InfrastructureState;

/// Keys written by the infrastructure flow
pub mod keys {
    /// "true" once a reconciler created at least one Azure resource
    pub const CREATED_RESOURCES_EXIST: &str = "created-resources-exist";
    /// "true" while the legacy reconciler's seed artifacts still need removal
    pub const LEGACY_CLEANUP_PENDING: &str = "legacy-cleanup-pending";
    pub const RESOURCE_GROUP_ID: &str = "resource-group-id";
    pub const VNET_ID: &str = "vnet-id";
    pub const ROUTE_TABLE_ID: &str = "route-table-id";
    pub const SECURITY_GROUP_ID: &str = "security-group-id";
    pub const IDENTITY_ID: &str = "identity-id";
    pub const IDENTITY_CLIENT_ID: &str = "identity-client-id";

    pub const PUBLIC_IP_PREFIX: &str = "public-ip/";
    pub const NAT_GATEWAY_PREFIX: &str = "nat-gateway/";
    pub const SUBNET_PREFIX: &str = "subnet/";
    pub const AVAILABILITY_SET_PREFIX: &str = "availability-set/";

    pub fn public_ip(name: &str) -> String {
        format!("{PUBLIC_IP_PREFIX}{name}")
    }

    pub fn nat_gateway(name: &str) -> String {
        format!("{NAT_GATEWAY_PREFIX}{name}")
    }

    pub fn subnet(name: &str) -> String {
        format!("{SUBNET_PREFIX}{name}")
    }

    /// NAT gateway bound to a subnet
    pub fn subnet_nat_gateway(name: &str) -> String {
        format!("{SUBNET_PREFIX}{name}/nat-gateway")
    }

    pub fn availability_set(name: &str) -> String {
        format!("{AVAILABILITY_SET_PREFIX}{name}")
    }
}

/// Thread-safe string map shared by all tasks of a flow
#[derive(Clone, Debug, Default)]
pub struct Whiteboard {
    data: Arc<RwLock<BTreeMap<String, String>>>,
}

impl Whiteboard {
    pub fn new(data: BTreeMap<String, String>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.write().remove(key)
    }

    pub fn is_true(&self, key: &str) -> bool {
        self.read().get(key).map(|v| v == "true").unwrap_or(false)
    }

    /// Names under `prefix`, e.g. all NAT gateways ever recorded
    pub fn names_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.read()
            .keys()
            .filter_map(|k| k.strip_prefix(prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    pub fn created_resources_exist(&self) -> bool {
        self.is_true(keys::CREATED_RESOURCES_EXIST)
    }

    pub fn mark_created_resources_exist(&self) {
        self.set(keys::CREATED_RESOURCES_EXIST, "true");
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.read().clone()
    }

    /// The persisted form
    pub fn to_state(&self) -> InfrastructureState {
        InfrastructureState::new(self.snapshot())
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let board = Whiteboard::default();
        assert!(!board.created_resources_exist());

        board.mark_created_resources_exist();
        board.set(keys::nat_gateway("shoot--foo--az-nat-gateway"), "/id/nat");
        board.set(keys::subnet("shoot--foo--az-nodes"), "/id/subnet");
        board.set(keys::subnet_nat_gateway("shoot--foo--az-nodes"), "/id/nat");

        assert!(board.created_resources_exist());
        assert_eq!(
            board.names_with_prefix(keys::SUBNET_PREFIX),
            vec!["shoot--foo--az-nodes".to_string()]
        );
        assert_eq!(
            board.names_with_prefix(keys::NAT_GATEWAY_PREFIX),
            vec!["shoot--foo--az-nat-gateway".to_string()]
        );

        let state = board.to_state();
        assert_eq!(state.kind, "InfrastructureState");
        assert_eq!(state.data.get("created-resources-exist").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_clones_share_data() {
        let board = Whiteboard::default();
        let other = board.clone();
        other.set(keys::VNET_ID, "/id/vnet");
        assert_eq!(board.get(keys::VNET_ID).as_deref(), Some("/id/vnet"));
        assert_eq!(board.remove(keys::VNET_ID).as_deref(), Some("/id/vnet"));
        assert!(other.get(keys::VNET_ID).is_none());
    }
}

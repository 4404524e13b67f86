use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControlPlaneConfig {
    pub cloud_controller_manager: Option<CloudControllerManagerConfig>,
    pub storage: Option<Storage>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CloudControllerManagerConfig {
    pub feature_gates: BTreeMap<String, bool>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Storage {
    pub managed_default_storage_class: Option<bool>,
    pub managed_default_volume_snapshot_class: Option<bool>,
}

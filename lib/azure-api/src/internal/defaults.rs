//! Defaulting of the v1alpha1 wire form, applied on decode

use crate::v1alpha1;

/// A VNet created by the extension inherits the worker CIDR when no CIDR is given.
pub fn infrastructure_config(config: &mut v1alpha1::InfrastructureConfig) {
    let networks = &mut config.networks;
    let foreign = networks.vnet.name.is_some() && networks.vnet.resource_group.is_some();
    if !foreign && networks.vnet.cidr.is_none() {
        networks.vnet.cidr = networks.workers.clone();
    }
}

/// Default storage classes are managed unless disabled explicitly.
pub fn control_plane_config(config: &mut v1alpha1::ControlPlaneConfig) {
    let storage = config.storage.get_or_insert_with(Default::default);
    storage.managed_default_storage_class.get_or_insert(true);
    storage.managed_default_volume_snapshot_class.get_or_insert(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vnet_cidr_defaults_to_workers() {
        let mut config = v1alpha1::InfrastructureConfig::default();
        config.networks.workers = Some("10.250.0.0/19".into());
        infrastructure_config(&mut config);
        assert_eq!(config.networks.vnet.cidr.as_deref(), Some("10.250.0.0/19"));
    }

    #[test]
    fn test_foreign_vnet_cidr_not_defaulted() {
        let mut config = v1alpha1::InfrastructureConfig::default();
        config.networks.workers = Some("10.250.0.0/19".into());
        config.networks.vnet.name = Some("vnet".into());
        config.networks.vnet.resource_group = Some("rg".into());
        infrastructure_config(&mut config);
        assert!(config.networks.vnet.cidr.is_none());
    }

    #[test]
    fn test_storage_defaults() {
        let mut config = v1alpha1::ControlPlaneConfig::default();
        control_plane_config(&mut config);
        let storage = config.storage.unwrap();
        assert_eq!(storage.managed_default_storage_class, Some(true));
        assert_eq!(storage.managed_default_volume_snapshot_class, Some(true));

        let mut config = v1alpha1::ControlPlaneConfig {
            storage: Some(v1alpha1::control_plane::Storage {
                managed_default_storage_class: Some(false),
                managed_default_volume_snapshot_class: None,
            }),
            ..Default::default()
        };
        control_plane_config(&mut config);
        let storage = config.storage.unwrap();
        assert_eq!(storage.managed_default_storage_class, Some(false));
        assert_eq!(storage.managed_default_volume_snapshot_class, Some(true));
    }
}

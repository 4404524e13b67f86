//! Defaulting of Azure shoots
//!
//! [`mutate_shoot`] is a pure function of the feature gates and the new and
//! old shoot. It applies, in order:
//!
//! 1. the cilium overlay default of `spec.networking.providerConfig`,
//! 2. NAT gateway defaulting of the infrastructure config (gated by `ForceNatGateway`),
//! 3. `forceTCPToUpstreamDNS: false` for NodeLocalDNS.

use azure_api::annotations;
use azure_api::decode;
use azure_api::v1alpha1::{InfrastructureConfig, KIND_INFRASTRUCTURE_CONFIG};
use azure_api::v1alpha1::infrastructure::{NatGatewayConfig, ZonedNatGatewayConfig};
use azure_api::Shoot;
use azure_core::FeatureGates;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{AdmissionError, Result};

const CILIUM: &str = "cilium";
const OVERLAY: &str = "overlay";

/// Apply the Azure defaults to `new`. Returns without touching `new` when
/// the shoot is not to be mutated.
pub fn mutate_shoot(gates: &FeatureGates, new: &mut Shoot, old: Option<&Shoot>) -> Result<()> {
    if let Some(reason) = skip_reason(new, old) {
        debug!(shoot = ?new.metadata.name, reason, "Leaving shoot unchanged");
        return Ok(());
    }

    default_overlay(new, old)?;
    if gates.force_nat_gateway {
        default_nat_gateways(new, old)?;
    }
    default_node_local_dns(new);
    Ok(())
}

fn skip_reason(new: &Shoot, old: Option<&Shoot>) -> Option<&'static str> {
    if new.is_workerless() {
        return Some("workerless");
    }
    if new.is_rescheduled_before_migration() {
        return Some("rescheduled before migration");
    }
    if new.metadata.deletion_timestamp.is_some()
        || old.map(|o| o.metadata.deletion_timestamp.is_some()).unwrap_or(false)
    {
        return Some("being deleted");
    }
    if let Some(old) = old {
        if new.is_in_migration_or_restore() {
            return Some("in migration or restore");
        }
        if new.spec == old.spec {
            return Some("spec unchanged");
        }
    }
    None
}

fn network_config(shoot: &Shoot) -> Result<Option<Map<String, Value>>> {
    match shoot.spec.networking.as_ref().and_then(|n| n.provider_config.as_ref()) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(other) => Err(AdmissionError::NetworkConfig(format!("expected an object, got {}", other))),
    }
}

fn default_overlay(new: &mut Shoot, old: Option<&Shoot>) -> Result<()> {
    let Some(networking) = new.spec.networking.as_ref() else {
        return Ok(());
    };
    if networking.type_.as_deref() != Some(CILIUM) {
        return Ok(());
    }

    let mut config = network_config(new)?.unwrap_or_default();
    if config.contains_key(OVERLAY) {
        return Ok(());
    }
    match old {
        None => {
            config.insert(OVERLAY.into(), json!({"enabled": false}));
        }
        Some(old) => match network_config(old)?.and_then(|c| c.get(OVERLAY).cloned()) {
            Some(overlay) => {
                config.insert(OVERLAY.into(), overlay);
            }
            None => return Ok(()),
        },
    }

    if let Some(networking) = new.spec.networking.as_mut() {
        networking.provider_config = Some(Value::Object(config));
    }
    Ok(())
}

fn infrastructure_config(shoot: &Shoot) -> Result<Option<InfrastructureConfig>> {
    shoot
        .spec
        .provider
        .infrastructure_config
        .as_ref()
        .map(|raw| decode::external(raw, KIND_INFRASTRUCTURE_CONFIG).map_err(AdmissionError::InfrastructureConfig))
        .transpose()
}

fn default_nat_gateways(new: &mut Shoot, old: Option<&Shoot>) -> Result<()> {
    let Some(mut config) = infrastructure_config(new)? else {
        return Ok(());
    };
    let vnet = &config.networks.vnet;
    if vnet.name.is_some() && vnet.resource_group.is_some() {
        return Ok(());
    }

    let should_mutate = match old {
        None => true,
        Some(old) => annotations::is_true(old.metadata.annotations.as_ref(), annotations::MUTATE_NAT_CONFIG),
    };
    if !should_mutate {
        return Ok(());
    }
    new.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(annotations::MUTATE_NAT_CONFIG.to_string(), "true".to_string());

    // Keep NAT gateways the user did not unset explicitly
    if let Some(old_config) = old.map(infrastructure_config).transpose()?.flatten() {
        keep_previous_nat_gateways(&mut config, &old_config);
    }

    if config.networks.zones.is_empty() {
        if config.networks.nat_gateway.is_none() {
            config.networks.nat_gateway = Some(NatGatewayConfig {
                enabled: true,
                ..Default::default()
            });
            config.zoned = true;
        }
    } else {
        for zone in config.networks.zones.iter_mut().filter(|z| z.nat_gateway.is_none()) {
            zone.nat_gateway = Some(ZonedNatGatewayConfig {
                enabled: true,
                ..Default::default()
            });
        }
    }

    new.spec.provider.infrastructure_config = Some(serde_json::to_value(&config)?);
    Ok(())
}

fn keep_previous_nat_gateways(new: &mut InfrastructureConfig, old: &InfrastructureConfig) {
    let old_multi = !old.networks.zones.is_empty();
    let new_multi = !new.networks.zones.is_empty();
    match (old_multi, new_multi) {
        (false, false) => {
            if new.networks.nat_gateway.is_none() {
                new.networks.nat_gateway = old.networks.nat_gateway.clone();
            }
        }
        (true, true) => {
            for (zone, previous) in new.networks.zones.iter_mut().zip(&old.networks.zones) {
                if zone.nat_gateway.is_none() {
                    zone.nat_gateway = previous.nat_gateway.clone();
                }
            }
        }
        // Moving to or from a zonal layout starts over
        _ => {}
    }
}

fn default_node_local_dns(new: &mut Shoot) {
    let dns = new
        .spec
        .system_components
        .as_mut()
        .and_then(|c| c.node_local_dns.as_mut());
    if let Some(dns) = dns {
        if dns.enabled && dns.force_tcp_to_upstream_dns.is_none() {
            dns.force_tcp_to_upstream_dns = Some(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    const NAT_ON: FeatureGates = FeatureGates {
        force_nat_gateway: true,
        disable_remedy_controller: false,
    };

    fn shoot(infrastructure_config: Value) -> Shoot {
        serde_json::from_value(json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "Shoot",
            "metadata": {"name": "az", "namespace": "garden-foo"},
            "spec": {
                "region": "westeurope",
                "provider": {
                    "type": "azure",
                    "infrastructureConfig": infrastructure_config,
                    "workers": [{"name": "worker", "maximum": 2, "minimum": 1, "zones": ["1"]}]
                },
                "networking": {"type": "calico", "nodes": "10.250.0.0/16"}
            }
        }))
        .unwrap()
    }

    fn single_subnet(zoned: bool) -> Value {
        json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "InfrastructureConfig",
            "networks": {"vnet": {"cidr": "10.250.0.0/16"}, "workers": "10.250.0.0/19"},
            "zoned": zoned
        })
    }

    fn config_of(shoot: &Shoot) -> Value {
        shoot.spec.provider.infrastructure_config.clone().unwrap()
    }

    fn annotate(shoot: &mut Shoot) {
        shoot
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(annotations::MUTATE_NAT_CONFIG.into(), "true".into());
    }

    #[test]
    fn test_new_single_subnet_shoot_gets_nat_gateway() {
        let mut new = shoot(single_subnet(false));
        mutate_shoot(&NAT_ON, &mut new, None).unwrap();

        let config = config_of(&new);
        assert_eq!(config["networks"]["natGateway"], json!({"enabled": true}));
        assert_eq!(config["zoned"], true);
        assert_eq!(config["apiVersion"], "azure.provider.extensions.gardener.cloud/v1alpha1");
        assert_eq!(config["kind"], "InfrastructureConfig");
        assert_eq!(new.annotation(annotations::MUTATE_NAT_CONFIG), Some("true"));
    }

    #[test]
    fn test_gate_off_leaves_nat_alone() {
        let mut new = shoot(single_subnet(false));
        let before = new.clone();
        mutate_shoot(&FeatureGates::default(), &mut new, None).unwrap();
        assert_eq!(new, before);
    }

    #[test]
    fn test_existing_vnet_is_not_mutated() {
        let mut new = shoot(json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "InfrastructureConfig",
            "networks": {"vnet": {"name": "ext", "resourceGroup": "ext-rg"}, "workers": "10.250.0.0/19"},
            "zoned": false
        }));
        let before = new.clone();
        mutate_shoot(&NAT_ON, &mut new, None).unwrap();
        assert_eq!(new, before);
    }

    #[test]
    fn test_update_without_sticky_annotation_is_not_mutated() {
        let old = shoot(single_subnet(false));
        let mut new = old.clone();
        new.spec.region = "northeurope".into();
        mutate_shoot(&NAT_ON, &mut new, Some(&old)).unwrap();

        assert!(config_of(&new)["networks"].get("natGateway").is_none());
        assert_eq!(new.annotation(annotations::MUTATE_NAT_CONFIG), None);
    }

    #[test]
    fn test_unset_nat_gateway_is_restored() {
        let mut old_config = single_subnet(true);
        old_config["networks"]["natGateway"] = json!({"enabled": true, "idleConnectionTimeoutMinutes": 8});
        let mut old = shoot(old_config);
        annotate(&mut old);

        let mut new = shoot(single_subnet(true));
        annotate(&mut new);
        new.spec.region = "northeurope".into();
        mutate_shoot(&NAT_ON, &mut new, Some(&old)).unwrap();

        assert_eq!(
            config_of(&new)["networks"]["natGateway"],
            json!({"enabled": true, "idleConnectionTimeoutMinutes": 8})
        );
    }

    fn zones(nat: &[Option<Value>]) -> Value {
        let zones: Vec<Value> = nat
            .iter()
            .enumerate()
            .map(|(i, nat)| {
                let mut zone = json!({"name": i + 1, "cidr": format!("10.250.{}.0/24", i)});
                if let Some(nat) = nat {
                    zone["natGateway"] = nat.clone();
                }
                zone
            })
            .collect();
        json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "InfrastructureConfig",
            "networks": {"vnet": {"cidr": "10.250.0.0/16"}, "zones": zones},
            "zoned": true
        })
    }

    #[test]
    fn test_zones_get_nat_gateways() {
        let mut new = shoot(zones(&[None, Some(json!({"enabled": false}))]));
        mutate_shoot(&NAT_ON, &mut new, None).unwrap();

        let config = config_of(&new);
        assert_eq!(config["networks"]["zones"][0]["natGateway"], json!({"enabled": true}));
        assert_eq!(config["networks"]["zones"][1]["natGateway"], json!({"enabled": false}));
    }

    #[test]
    fn test_zone_nat_gateways_are_restored() {
        let mut old = shoot(zones(&[Some(json!({"enabled": true, "idleConnectionTimeoutMinutes": 4})), None]));
        annotate(&mut old);
        let mut new = shoot(zones(&[None, None]));
        new.spec.region = "northeurope".into();

        mutate_shoot(&NAT_ON, &mut new, Some(&old)).unwrap();
        let config = config_of(&new);
        assert_eq!(
            config["networks"]["zones"][0]["natGateway"],
            json!({"enabled": true, "idleConnectionTimeoutMinutes": 4})
        );
        assert_eq!(config["networks"]["zones"][1]["natGateway"], json!({"enabled": true}));
    }

    #[test]
    fn test_switch_to_zones_does_not_carry_single_nat() {
        let mut old_config = single_subnet(true);
        old_config["networks"]["natGateway"] = json!({"enabled": true, "idleConnectionTimeoutMinutes": 8});
        let mut old = shoot(old_config);
        annotate(&mut old);
        let mut new = shoot(zones(&[None]));

        mutate_shoot(&NAT_ON, &mut new, Some(&old)).unwrap();
        let config = config_of(&new);
        assert!(config["networks"].get("natGateway").is_none());
        assert_eq!(config["networks"]["zones"][0]["natGateway"], json!({"enabled": true}));
    }

    #[test]
    fn test_invalid_infrastructure_config_is_rejected() {
        let mut new = shoot(json!({
            "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
            "kind": "InfrastructureConfig",
            "networks": {"vnet": {"cidr": "10.250.0.0/16"}, "unknown": true}
        }));
        let err = mutate_shoot(&NAT_ON, &mut new, None).unwrap_err();
        assert!(matches!(err, AdmissionError::InfrastructureConfig(_)), "{}", err);
    }

    fn cilium(shoot: &mut Shoot, provider_config: Option<Value>) {
        let networking = shoot.spec.networking.get_or_insert_with(Default::default);
        networking.type_ = Some(CILIUM.into());
        networking.provider_config = provider_config;
    }

    #[test]
    fn test_cilium_overlay_defaults() {
        let mut new = shoot(single_subnet(true));
        cilium(&mut new, None);
        mutate_shoot(&FeatureGates::default(), &mut new, None).unwrap();
        assert_eq!(
            new.spec.networking.as_ref().unwrap().provider_config,
            Some(json!({"overlay": {"enabled": false}}))
        );

        let mut old = shoot(single_subnet(true));
        cilium(&mut old, Some(json!({"overlay": {"enabled": true, "createPodRoutes": true}})));
        let mut new = old.clone();
        cilium(&mut new, Some(json!({"bpfSocketLBHostnsOnly": {"enabled": true}})));
        mutate_shoot(&FeatureGates::default(), &mut new, Some(&old)).unwrap();
        assert_eq!(
            new.spec.networking.as_ref().unwrap().provider_config,
            Some(json!({
                "bpfSocketLBHostnsOnly": {"enabled": true},
                "overlay": {"enabled": true, "createPodRoutes": true}
            }))
        );
    }

    #[test]
    fn test_explicit_overlay_and_other_networks_are_kept() {
        let mut new = shoot(single_subnet(true));
        cilium(&mut new, Some(json!({"overlay": {"enabled": true}})));
        mutate_shoot(&FeatureGates::default(), &mut new, None).unwrap();
        assert_eq!(
            new.spec.networking.as_ref().unwrap().provider_config,
            Some(json!({"overlay": {"enabled": true}}))
        );

        let mut new = shoot(single_subnet(true));
        mutate_shoot(&FeatureGates::default(), &mut new, None).unwrap();
        assert_eq!(new.spec.networking.as_ref().unwrap().provider_config, None);
    }

    #[test]
    fn test_node_local_dns_defaults_to_udp_upstream() {
        let mut new = shoot(single_subnet(true));
        new.spec.system_components = Some(serde_json::from_value(json!({"nodeLocalDNS": {"enabled": true}})).unwrap());
        mutate_shoot(&FeatureGates::default(), &mut new, None).unwrap();
        let dns = new.spec.system_components.unwrap().node_local_dns.unwrap();
        assert_eq!(dns.force_tcp_to_upstream_dns, Some(false));

        let mut new = shoot(single_subnet(true));
        new.spec.system_components = Some(
            serde_json::from_value(json!({"nodeLocalDNS": {"enabled": true, "forceTCPToUpstreamDNS": true}})).unwrap(),
        );
        mutate_shoot(&FeatureGates::default(), &mut new, None).unwrap();
        let dns = new.spec.system_components.unwrap().node_local_dns.unwrap();
        assert_eq!(dns.force_tcp_to_upstream_dns, Some(true));
    }

    #[test]
    fn test_skip_conditions_leave_shoot_untouched() {
        let mut dns_enabled = shoot(single_subnet(false));
        dns_enabled.spec.system_components =
            Some(serde_json::from_value(json!({"nodeLocalDNS": {"enabled": true}})).unwrap());
        cilium(&mut dns_enabled, None);

        let mut workerless = dns_enabled.clone();
        workerless.spec.provider.workers.clear();

        let mut rescheduled = dns_enabled.clone();
        rescheduled.spec.seed_name = Some("seed-b".into());
        rescheduled.status = Some(serde_json::from_value(json!({"seedName": "seed-a"})).unwrap());

        let mut deleting = dns_enabled.clone();
        deleting.metadata.deletion_timestamp = Some(Time(chrono_now()));

        let mut migrating = dns_enabled.clone();
        migrating.spec.region = "northeurope".into();
        migrating.status =
            Some(serde_json::from_value(json!({"lastOperation": {"type": "Migrate", "state": "Processing"}})).unwrap());

        let cases: Vec<(&str, Shoot, Option<Shoot>)> = vec![
            ("workerless", workerless, None),
            ("rescheduled", rescheduled, None),
            ("deleting", deleting, None),
            ("migrating", migrating, Some(dns_enabled.clone())),
            ("unchanged", dns_enabled.clone(), Some(dns_enabled.clone())),
        ];
        for (name, input, old) in cases {
            let mut output = input.clone();
            mutate_shoot(&NAT_ON, &mut output, old.as_ref()).unwrap();
            assert_eq!(
                serde_json::to_vec(&output).unwrap(),
                serde_json::to_vec(&input).unwrap(),
                "{} shoot was mutated",
                name
            );
        }
    }

    fn chrono_now() -> k8s_openapi::chrono::DateTime<k8s_openapi::chrono::Utc> {
        k8s_openapi::chrono::Utc::now()
    }
}

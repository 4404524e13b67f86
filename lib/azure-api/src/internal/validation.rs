//! Validation of the internal InfrastructureConfig

use std::collections::HashSet;
use std::fmt;

use ipnetwork::Ipv4Network;

use super::infrastructure::InfrastructureConfig;

const MIN_IDLE_TIMEOUT_MINUTES: i32 = 4;
const MAX_IDLE_TIMEOUT_MINUTES: i32 = 120;

/// All problems found in a config, reported at once
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError(pub Vec<String>);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}

impl std::error::Error for ValidationError {}

fn parse_cidr(field: &str, value: &str, errors: &mut Vec<String>) -> Option<Ipv4Network> {
    match value.parse::<Ipv4Network>() {
        Ok(net) => Some(net),
        Err(e) => {
            errors.push(format!("{field}: invalid CIDR {value:?}: {e}"));
            None
        }
    }
}

fn contains(outer: &Ipv4Network, inner: &Ipv4Network) -> bool {
    outer.contains(inner.network()) && outer.contains(inner.broadcast())
}

fn overlaps(a: &Ipv4Network, b: &Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

fn check_idle_timeout(field: &str, value: Option<i32>, errors: &mut Vec<String>) {
    if let Some(minutes) = value {
        if !(MIN_IDLE_TIMEOUT_MINUTES..=MAX_IDLE_TIMEOUT_MINUTES).contains(&minutes) {
            errors.push(format!(
                "{field}: idle connection timeout must be between {MIN_IDLE_TIMEOUT_MINUTES} and {MAX_IDLE_TIMEOUT_MINUTES} minutes, got {minutes}"
            ));
        }
    }
}

/// Validate layout, CIDRs and NAT settings of `config`
pub fn validate_infrastructure_config(config: &InfrastructureConfig) -> Result<(), ValidationError> {
    let mut errors = Vec::new();
    let networks = &config.networks;
    let vnet = &networks.vnet;

    if vnet.name.is_some() != vnet.resource_group.is_some() {
        errors.push("networks.vnet: name and resourceGroup must be set together".to_string());
    }

    let vnet_cidr = if vnet.is_foreign() {
        if vnet.cidr.is_some() {
            errors.push("networks.vnet.cidr: must not be set for an existing vnet".to_string());
        }
        None
    } else {
        match vnet.cidr.as_deref() {
            Some(cidr) => parse_cidr("networks.vnet.cidr", cidr, &mut errors),
            None => {
                errors.push("networks.vnet.cidr: must be set when no existing vnet is used".to_string());
                None
            }
        }
    };

    if let Some(rg) = &config.resource_group {
        if rg.name.is_empty() {
            errors.push("resourceGroup.name: must not be empty".to_string());
        }
    }

    if networks.zones.is_empty() {
        match networks.workers.as_deref() {
            Some(workers) => {
                if let Some(net) = parse_cidr("networks.workers", workers, &mut errors) {
                    if let Some(vnet_net) = &vnet_cidr {
                        if !contains(vnet_net, &net) {
                            errors.push(format!(
                                "networks.workers: {workers} is not inside the vnet CIDR {vnet_net}"
                            ));
                        }
                    }
                }
            }
            None => errors.push(
                "networks.workers: must be set when networks.zones is empty".to_string(),
            ),
        }

        if let Some(nat) = &networks.nat_gateway {
            check_idle_timeout(
                "networks.natGateway",
                nat.idle_connection_timeout_minutes,
                &mut errors,
            );
            if nat.zone.is_some() && !config.zoned {
                errors.push("networks.natGateway.zone: requires a zoned cluster".to_string());
            }
            if !nat.enabled && !nat.ip_addresses.is_empty() {
                errors.push(
                    "networks.natGateway.ipAddresses: requires an enabled NAT gateway".to_string(),
                );
            }
            for (i, ip) in nat.ip_addresses.iter().enumerate() {
                if ip.zone != nat.zone {
                    errors.push(format!(
                        "networks.natGateway.ipAddresses[{i}].zone: must match the NAT gateway zone"
                    ));
                }
            }
        }
    } else {
        if networks.workers.is_some() {
            errors.push("networks.workers: must not be set together with networks.zones".to_string());
        }
        if networks.nat_gateway.is_some() {
            errors.push(
                "networks.natGateway: must not be set together with networks.zones".to_string(),
            );
        }
        if !networks.service_endpoints.is_empty() {
            errors.push(
                "networks.serviceEndpoints: must be set per zone when networks.zones is used"
                    .to_string(),
            );
        }
        if !config.zoned {
            errors.push("networks.zones: requires a zoned cluster".to_string());
        }

        let mut names = HashSet::new();
        let mut nets: Vec<(usize, Ipv4Network)> = Vec::new();
        for (i, zone) in networks.zones.iter().enumerate() {
            let field = format!("networks.zones[{i}]");
            if !names.insert(zone.name) {
                errors.push(format!("{field}.name: duplicate zone {}", zone.name));
            }
            if let Some(net) = parse_cidr(&format!("{field}.cidr"), &zone.cidr, &mut errors) {
                if let Some(vnet_net) = &vnet_cidr {
                    if !contains(vnet_net, &net) {
                        errors.push(format!(
                            "{field}.cidr: {} is not inside the vnet CIDR {vnet_net}",
                            zone.cidr
                        ));
                    }
                }
                for (j, other) in &nets {
                    if overlaps(&net, other) {
                        errors.push(format!(
                            "{field}.cidr: {} overlaps with networks.zones[{j}].cidr",
                            zone.cidr
                        ));
                    }
                }
                nets.push((i, net));
            }
            if let Some(nat) = &zone.nat_gateway {
                check_idle_timeout(&format!("{field}.natGateway"), nat.idle_connection_timeout_minutes, &mut errors);
                if !nat.enabled && !nat.ip_addresses.is_empty() {
                    errors.push(format!(
                        "{field}.natGateway.ipAddresses: requires an enabled NAT gateway"
                    ));
                }
            }
        }
    }

    if let Some(identity) = &config.identity {
        if identity.name.is_empty() || identity.resource_group.is_empty() {
            errors.push("identity: name and resourceGroup must be set".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError(errors))
    }
}

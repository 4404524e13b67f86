//! Controller configuration
//!
//! Loaded once at startup from an optional YAML file. Durations are written
//! the human way (`"15m"`, `"90s"`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse controller config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid controller config: {0}")]
    Invalid(String),
}

/// Feature gates, copied by value into every reconciliation and admission request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct FeatureGates {
    /// Default NAT gateways on shoots that do not use an existing VNet
    #[serde(default)]
    pub force_nat_gateway: bool,

    /// Remove the remedy controller's finalizers from shoot services on every reconcile
    #[serde(default)]
    pub disable_remedy_controller: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ControllerConfig {
    #[serde(default)]
    pub feature_gates: FeatureGates,

    /// Worker loops per resource kind
    #[serde(default = "default_concurrent_syncs")]
    pub concurrent_syncs: usize,

    /// Independent flow tasks run concurrently within one reconciliation
    #[serde(default = "default_flow_concurrency")]
    pub flow_concurrency: usize,

    #[serde(default = "default_task_timeout", deserialize_with = "duration")]
    pub task_timeout: Duration,

    #[serde(default = "default_graceful_deletion_timeout", deserialize_with = "duration")]
    pub graceful_deletion_timeout: Duration,

    #[serde(default = "default_graceful_deletion_wait_interval", deserialize_with = "duration")]
    pub graceful_deletion_wait_interval: Duration,
}

fn default_concurrent_syncs() -> usize {
    5
}

fn default_flow_concurrency() -> usize {
    4
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_graceful_deletion_timeout() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_graceful_deletion_wait_interval() -> Duration {
    Duration::from_secs(60)
}

fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            feature_gates: FeatureGates::default(),
            concurrent_syncs: default_concurrent_syncs(),
            flow_concurrency: default_flow_concurrency(),
            task_timeout: default_task_timeout(),
            graceful_deletion_timeout: default_graceful_deletion_timeout(),
            graceful_deletion_wait_interval: default_graceful_deletion_wait_interval(),
        }
    }
}

impl ControllerConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrent_syncs == 0 {
            return Err(ConfigError::Invalid("concurrentSyncs must be positive".into()));
        }
        if self.flow_concurrency == 0 {
            return Err(ConfigError::Invalid("flowConcurrency must be positive".into()));
        }
        if self.task_timeout.is_zero() {
            return Err(ConfigError::Invalid("taskTimeout must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_yaml("").unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.concurrent_syncs, 5);
        assert_eq!(config.flow_concurrency, 4);
        assert_eq!(config.task_timeout, Duration::from_secs(900));
        assert_eq!(config.graceful_deletion_timeout, Duration::from_secs(600));
        assert_eq!(config.graceful_deletion_wait_interval, Duration::from_secs(60));
        assert!(!config.feature_gates.force_nat_gateway);
    }

    #[test]
    fn test_parse_yaml() {
        let config = ControllerConfig::from_yaml(
            r#"
featureGates:
  ForceNatGateway: true
  DisableRemedyController: true
concurrentSyncs: 10
taskTimeout: 5m
gracefulDeletionWaitInterval: 30s
"#,
        )
        .unwrap();

        assert!(config.feature_gates.force_nat_gateway);
        assert!(config.feature_gates.disable_remedy_controller);
        assert_eq!(config.concurrent_syncs, 10);
        assert_eq!(config.task_timeout, Duration::from_secs(300));
        assert_eq!(config.graceful_deletion_wait_interval, Duration::from_secs(30));
        assert_eq!(config.graceful_deletion_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ControllerConfig::from_yaml("taskTimeout: soon").is_err());
        assert!(ControllerConfig::from_yaml("flowConcurrency: 0").is_err());
        assert!(ControllerConfig::from_yaml("featureGates:\n  Unknown: true").is_err());
    }
}

//! In-memory seed and fixtures shared by the reconciler tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use azure_api::extensions::infrastructure::{InfrastructureSpec, InfrastructureStatus as ResourceStatus};
use azure_api::extensions::{ClusterContext, SecretReference};
use azure_api::Infrastructure;
use azure_client::fake::{FakeAzure, FAKE_SUBSCRIPTION};
use azure_core::infrastructure::{ActuatorOptions, InfrastructureActuator, InfrastructureClient};
use azure_core::{Error, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde_json::{json, Map, Value};

pub const NAMESPACE: &str = "shoot--foo--az";
pub const NAME: &str = "az";
pub const REGION: &str = "westeurope";
pub const SECRET_NAME: &str = "cloudprovider";

#[derive(Default)]
struct Seed {
    secrets: BTreeMap<String, Secret>,
    status: Map<String, Value>,
    deleted: Vec<String>,
    removed_finalizers: Vec<String>,
    status_patches: usize,
    status_patch_error: Option<String>,
}

/// Seed cluster holding one Infrastructure's status
#[derive(Clone, Default)]
pub struct MemorySeed {
    inner: Arc<Mutex<Seed>>,
}

impl MemorySeed {
    pub fn with_credentials() -> Self {
        let seed = Self::default();
        let data = [
            ("clientID", "client"),
            ("clientSecret", "secret"),
            ("subscriptionID", FAKE_SUBSCRIPTION),
            ("tenantID", "tenant"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
        .collect();
        seed.inner.lock().unwrap().secrets.insert(
            SECRET_NAME.to_string(),
            Secret {
                data: Some(data),
                ..Default::default()
            },
        );
        seed
    }

    pub fn state(&self) -> Option<Value> {
        self.inner.lock().unwrap().status.get("state").cloned()
    }

    pub fn provider_status(&self) -> Option<Value> {
        self.inner.lock().unwrap().status.get("providerStatus").cloned()
    }

    pub fn set_state(&self, state: Value) {
        self.inner.lock().unwrap().status.insert("state".into(), state);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted.clone()
    }

    pub fn removed_finalizers(&self) -> Vec<String> {
        self.inner.lock().unwrap().removed_finalizers.clone()
    }

    /// Make every status write fail until cleared with `None`
    pub fn fail_status_patches(&self, error: Option<&str>) {
        self.inner.lock().unwrap().status_patch_error = error.map(str::to_string);
    }

    pub fn status_patches(&self) -> usize {
        self.inner.lock().unwrap().status_patches
    }

    /// Copy the stored status onto `infra`, as a fresh read from the API server would
    pub fn refresh(&self, infra: &mut Infrastructure) {
        let seed = self.inner.lock().unwrap();
        infra.status = Some(ResourceStatus {
            provider_status: seed.status.get("providerStatus").cloned(),
            state: seed.status.get("state").cloned(),
            ..Default::default()
        });
    }
}

#[async_trait]
impl InfrastructureClient for MemorySeed {
    async fn get_secret(&self, _namespace: &str, name: &str) -> Result<Secret> {
        self.inner
            .lock()
            .unwrap()
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::internal(format!("secret {} not found", name)))
    }

    async fn patch_status(&self, _namespace: &str, _name: &str, fields: Value) -> Result<()> {
        let mut seed = self.inner.lock().unwrap();
        seed.status_patches += 1;
        if let Some(error) = &seed.status_patch_error {
            return Err(Error::internal(error.clone()));
        }
        if let Value::Object(fields) = fields {
            for (key, value) in fields {
                if value.is_null() {
                    seed.status.remove(&key);
                } else {
                    seed.status.insert(key, value);
                }
            }
        }
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .deleted
            .push(format!("configmap {}/{}", namespace, name));
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .deleted
            .push(format!("secret {}/{}", namespace, name));
        Ok(())
    }

    async fn remove_finalizer(&self, _namespace: &str, _name: &str, finalizer: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .removed_finalizers
            .push(finalizer.to_string());
        Ok(())
    }
}

pub fn infrastructure(config: Value) -> Infrastructure {
    let mut provider_config = json!({
        "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
        "kind": "InfrastructureConfig",
    });
    if let (Value::Object(target), Value::Object(fields)) = (&mut provider_config, config) {
        target.extend(fields);
    }
    Infrastructure {
        metadata: ObjectMeta {
            name: Some(NAME.into()),
            namespace: Some(NAMESPACE.into()),
            ..Default::default()
        },
        spec: InfrastructureSpec {
            type_: "azure".into(),
            region: REGION.into(),
            secret_ref: SecretReference {
                name: SECRET_NAME.into(),
                namespace: NAMESPACE.into(),
            },
            provider_config: Some(provider_config),
            ssh_public_key: None,
        },
        status: None,
    }
}

pub fn cluster() -> ClusterContext {
    ClusterContext::default()
}

pub fn cluster_with_domain_counts(fault: i32, update: i32) -> ClusterContext {
    let mut cluster = ClusterContext::default();
    cluster.cloud_profile.spec.provider_config = Some(json!({
        "apiVersion": "azure.provider.extensions.gardener.cloud/v1alpha1",
        "kind": "CloudProfileConfig",
        "countFaultDomains": [{"region": REGION, "count": fault}],
        "countUpdateDomains": [{"region": REGION, "count": update}],
    }));
    cluster
}

pub fn actuator(seed: &MemorySeed, azure: &FakeAzure) -> InfrastructureActuator {
    InfrastructureActuator::new(
        Arc::new(seed.clone()),
        Arc::new(azure.clone()),
        ActuatorOptions::default(),
    )
}

//! Seed cluster access of the infrastructure actuator

use async_trait::async_trait;
use azure_api::Infrastructure;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use tracing::debug;

use crate::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait InfrastructureClient: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    /// Replace the top-level status fields present in `fields`; other fields
    /// are kept. A `null` value removes the field.
    async fn patch_status(&self, namespace: &str, name: &str, fields: Value) -> Result<()>;

    /// A missing ConfigMap counts as deleted
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    /// A missing Secret counts as deleted
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn remove_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<()>;
}

pub struct KubeInfrastructureClient {
    client: Client,
}

impl KubeInfrastructureClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// JSON patch replacing whole status fields. A merge patch would merge the
/// state's data map and keep keys the flow removed.
fn replace_status_fields(has_status: bool, fields: Value) -> Result<json_patch::Patch> {
    let Value::Object(fields) = fields else {
        return Err(crate::Error::internal("status fields must be a JSON object"));
    };
    let ops: Vec<Value> = if has_status {
        fields
            .into_iter()
            .map(|(key, value)| {
                // "add" replaces an existing member and, unlike "remove", does
                // not fail on an absent one
                let path = format!("/status/{}", key.replace('~', "~0").replace('/', "~1"));
                json!({ "op": "add", "path": path, "value": value })
            })
            .collect()
    } else {
        let fields: serde_json::Map<String, Value> =
            fields.into_iter().filter(|(_, v)| !v.is_null()).collect();
        vec![json!({ "op": "add", "path": "/status", "value": fields })]
    };
    Ok(serde_json::from_value(Value::Array(ops))?)
}

/// Merge patch replacing the finalizer list. The resource version makes the
/// API server reject the patch with a conflict when the object changed.
pub(crate) fn finalizer_patch(metadata: &ObjectMeta, finalizers: Vec<String>) -> Value {
    json!({
        "metadata": {
            "resourceVersion": metadata.resource_version,
            "finalizers": finalizers,
        }
    })
}

fn ignore_not_found(result: kube::Result<()>) -> Result<()> {
    match result {
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        other => other.map_err(Into::into),
    }
}

#[async_trait]
impl InfrastructureClient for KubeInfrastructureClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(secrets.get(name).await?)
    }

    async fn patch_status(&self, namespace: &str, name: &str, fields: Value) -> Result<()> {
        let infrastructures: Api<Infrastructure> = Api::namespaced(self.client.clone(), namespace);
        let current = infrastructures.get_status(name).await?;
        let patch = replace_status_fields(current.status.is_some(), fields)?;
        infrastructures
            .patch_status(name, &PatchParams::default(), &Patch::<()>::Json(patch))
            .await?;
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        debug!(namespace, name, "Deleting config map");
        ignore_not_found(
            config_maps
                .delete(name, &DeleteParams::default())
                .await
                .map(|_| ()),
        )
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        debug!(namespace, name, "Deleting secret");
        ignore_not_found(secrets.delete(name, &DeleteParams::default()).await.map(|_| ()))
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<()> {
        let infrastructures: Api<Infrastructure> = Api::namespaced(self.client.clone(), namespace);
        let Some(current) = infrastructures.get_opt(name).await? else {
            return Ok(());
        };
        let finalizers = current.metadata.finalizers.clone().unwrap_or_default();
        if !finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        let remaining: Vec<String> = finalizers.into_iter().filter(|f| f != finalizer).collect();
        infrastructures
            .patch(name, &PatchParams::default(), &Patch::Merge(finalizer_patch(&current.metadata, remaining)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_fields_are_replaced_whole() {
        let patch = replace_status_fields(true, json!({"state": {"data": {}}, "providerStatus": null})).unwrap();
        let mut doc = json!({
            "status": {
                "state": {"data": {"subnet/old": "/id"}},
                "providerStatus": {"zoned": true},
                "lastOperation": {"type": "Reconcile"}
            }
        });
        json_patch::patch(&mut doc, &patch).unwrap();
        assert_eq!(doc["status"]["state"], json!({"data": {}}));
        assert!(doc["status"]["providerStatus"].is_null());
        assert_eq!(doc["status"]["lastOperation"]["type"], "Reconcile");
    }

    #[test]
    fn test_missing_status_is_created() {
        let patch = replace_status_fields(false, json!({"state": {"data": {}}, "providerStatus": null})).unwrap();
        let mut doc = json!({"metadata": {"name": "az"}});
        json_patch::patch(&mut doc, &patch).unwrap();
        assert_eq!(doc["status"], json!({"state": {"data": {}}}));
    }
}

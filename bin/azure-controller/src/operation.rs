//! Gardener operation bookkeeping shared by the controllers

use std::fmt::Debug;
use std::time::Duration;

use azure_api::extensions::{ClusterContext, LastError, LastOperation, LastOperationState, LastOperationType};
use azure_api::{annotations, Cluster, DecodeError};
use azure_core::ControllerMetrics;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub const FINALIZER: &str = "extensions.gardener.cloud/azure";
pub const OPERATION_ANNOTATION: &str = "gardener.cloud/operation";
pub const FORCE_DELETION_ANNOTATION: &str = "confirmation.gardener.cloud/force-deletion";

const ERROR_REQUEUE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Core(#[from] azure_core::Error),

    #[error("failed to decode cluster {name}: {source}")]
    Cluster {
        name: String,
        #[source]
        source: DecodeError,
    },

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0} has no namespace")]
    MissingNamespace(String),
}

/// What a reconciliation of an extension resource has to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Reconcile,
    Delete,
    ForceDelete,
    Migrate,
    Restore,
}

impl Operation {
    pub fn detect(meta: &ObjectMeta, cluster: &ClusterContext) -> Self {
        if meta.deletion_timestamp.is_some() {
            let forced = annotations::is_true(cluster.shoot.metadata.annotations.as_ref(), FORCE_DELETION_ANNOTATION);
            return if forced { Self::ForceDelete } else { Self::Delete };
        }
        match meta.annotations.as_ref().and_then(|a| a.get(OPERATION_ANNOTATION)).map(String::as_str) {
            Some("migrate") => Self::Migrate,
            Some("restore") => Self::Restore,
            _ => Self::Reconcile,
        }
    }

    /// `lastOperation.type` reported for this operation
    pub fn last_operation_type(&self, previous: Option<&LastOperation>) -> LastOperationType {
        match self {
            Self::Reconcile if previous.is_none() => LastOperationType::Create,
            Self::Reconcile => LastOperationType::Reconcile,
            Self::Delete | Self::ForceDelete => LastOperationType::Delete,
            Self::Migrate => LastOperationType::Migrate,
            Self::Restore => LastOperationType::Restore,
        }
    }
}

/// A resource migrated away from this seed must not delete its cloud resources
pub fn migrated(last: Option<&LastOperation>) -> bool {
    last.map(|op| op.type_ == LastOperationType::Migrate && op.state == LastOperationState::Succeeded)
        .unwrap_or(false)
}

pub fn error_policy(error: &ReconcileError) -> Action {
    match error {
        ReconcileError::Core(azure_core::Error::RequeueAfter { after, .. }) => Action::requeue(*after),
        _ => Action::requeue(ERROR_REQUEUE),
    }
}

/// Read the Cluster named after the seed namespace
pub async fn cluster(client: &Client, namespace: &str) -> Result<ClusterContext, ReconcileError> {
    let clusters: Api<Cluster> = Api::all(client.clone());
    let cluster = clusters.get(namespace).await?;
    ClusterContext::from_cluster(&cluster).map_err(|source| ReconcileError::Cluster {
        name: namespace.to_string(),
        source,
    })
}

pub async fn ensure_finalizer<K>(api: &Api<K>, obj: &K) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if obj.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(());
    }
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    let patch = json!({
        "metadata": {
            "resourceVersion": obj.resource_version(),
            "finalizers": finalizers,
        }
    });
    api.patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

pub async fn remove_finalizer<K>(api: &Api<K>, obj: &K) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(());
    }
    let finalizers: Vec<&String> = obj.finalizers().iter().filter(|f| *f != FINALIZER).collect();
    let patch = json!({
        "metadata": {
            "resourceVersion": obj.resource_version(),
            "finalizers": finalizers,
        }
    });
    match api.patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch)).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(e) => Err(e),
    }
}

pub async fn clear_operation_annotation<K>(api: &Api<K>, obj: &K) -> Result<(), kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if !obj.annotations().contains_key(OPERATION_ANNOTATION) {
        return Ok(());
    }
    let mut annotations = serde_json::Map::new();
    annotations.insert(OPERATION_ANNOTATION.to_string(), Value::Null);
    let patch = json!({ "metadata": { "annotations": annotations } });
    api.patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn status_fields(type_: LastOperationType, result: &azure_core::Result<()>) -> Value {
    match result {
        Ok(()) => json!({
            "lastOperation": LastOperation::new(type_, LastOperationState::Succeeded, format!("{:?} succeeded", type_)),
            "lastError": null,
        }),
        Err(azure_core::Error::RequeueAfter { reason, .. }) => json!({
            "lastOperation": LastOperation::new(type_, LastOperationState::Processing, reason.clone()),
        }),
        Err(e) => {
            let codes = e.codes().iter().map(|c| c.as_str().to_string()).collect();
            let description = e.to_string();
            json!({
                "lastOperation": LastOperation::new(type_, LastOperationState::Error, description.clone()),
                "lastError": LastError::new(description, e.task().map(str::to_string), codes),
            })
        }
    }
}

/// Write `lastOperation` and `lastError` for the outcome of an operation and
/// count it. A failure to record is logged; the outcome itself is what gets
/// returned.
pub async fn record<K>(
    api: &Api<K>,
    obj: &K,
    metrics: &ControllerMetrics,
    type_: LastOperationType,
    result: azure_core::Result<()>,
) -> Result<(), ReconcileError>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    metrics.observe_operation(&K::kind(&()), &format!("{:?}", type_), &result);
    let patch = json!({ "status": status_fields(type_, &result) });
    match api
        .patch_status(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => debug!(name = %obj.name_any(), operation = ?type_, "Recorded last operation"),
        Err(e) => warn!(name = %obj.name_any(), error = %e, "Failed to record last operation"),
    }
    result.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use azure_api::Shoot;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::BTreeMap;

    fn meta(annotation: Option<&str>, deleting: bool) -> ObjectMeta {
        ObjectMeta {
            annotations: annotation.map(|v| BTreeMap::from([(OPERATION_ANNOTATION.to_string(), v.to_string())])),
            deletion_timestamp: deleting.then(|| Time(k8s_openapi::chrono::Utc::now())),
            ..Default::default()
        }
    }

    #[test]
    fn test_detect_operation() {
        let cluster = ClusterContext::default();
        assert_eq!(Operation::detect(&meta(None, false), &cluster), Operation::Reconcile);
        assert_eq!(Operation::detect(&meta(Some("reconcile"), false), &cluster), Operation::Reconcile);
        assert_eq!(Operation::detect(&meta(Some("migrate"), false), &cluster), Operation::Migrate);
        assert_eq!(Operation::detect(&meta(Some("restore"), false), &cluster), Operation::Restore);
        assert_eq!(Operation::detect(&meta(Some("migrate"), true), &cluster), Operation::Delete);

        let mut shoot = Shoot::default();
        shoot.metadata.annotations = Some(BTreeMap::from([(FORCE_DELETION_ANNOTATION.to_string(), "true".to_string())]));
        let forced = ClusterContext {
            shoot,
            ..Default::default()
        };
        assert_eq!(Operation::detect(&meta(None, true), &forced), Operation::ForceDelete);
    }

    #[test]
    fn test_first_reconcile_is_create() {
        assert_eq!(Operation::Reconcile.last_operation_type(None), LastOperationType::Create);
        let previous = LastOperation::new(LastOperationType::Create, LastOperationState::Succeeded, "");
        assert_eq!(Operation::Reconcile.last_operation_type(Some(&previous)), LastOperationType::Reconcile);
        assert_eq!(Operation::ForceDelete.last_operation_type(Some(&previous)), LastOperationType::Delete);
    }

    #[test]
    fn test_migrated() {
        let done = LastOperation::new(LastOperationType::Migrate, LastOperationState::Succeeded, "");
        let failed = LastOperation::new(LastOperationType::Migrate, LastOperationState::Error, "");
        assert!(migrated(Some(&done)));
        assert!(!migrated(Some(&failed)));
        assert!(!migrated(None));
    }

    #[test]
    fn test_status_fields() {
        let ok = status_fields(LastOperationType::Reconcile, &Ok(()));
        assert_eq!(ok["lastOperation"]["state"], "Succeeded");
        assert!(ok["lastError"].is_null());

        let requeue = azure_core::Error::requeue_after(Duration::from_secs(60), "waiting for remedy resources");
        let waiting = status_fields(LastOperationType::Delete, &Err(requeue));
        assert_eq!(waiting["lastOperation"]["state"], "Processing");
        assert!(waiting.get("lastError").is_none());

        let failed = status_fields(
            LastOperationType::Reconcile,
            &Err(azure_core::Error::configuration("zones must not be empty")),
        );
        assert_eq!(failed["lastOperation"]["state"], "Error");
        assert_eq!(failed["lastError"]["codes"], json!(["ERR_CONFIGURATION_PROBLEM"]));
    }

    #[test]
    fn test_error_policy_honours_requeue() {
        let requeue = ReconcileError::Core(azure_core::Error::requeue_after(Duration::from_secs(42), "wait"));
        assert_eq!(error_policy(&requeue), Action::requeue(Duration::from_secs(42)));
        let other = ReconcileError::MissingNamespace("az".into());
        assert_eq!(error_policy(&other), Action::requeue(ERROR_REQUEUE));
    }
}

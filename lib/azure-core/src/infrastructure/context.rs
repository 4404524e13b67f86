use std::sync::Arc;

use azure_api::internal::InfrastructureConfig;
use azure_api::v1alpha1::CloudProfileConfig;
use azure_client::Factory;

use super::plan::InfrastructurePlan;
use crate::flow::Whiteboard;

/// Everything the tasks of one infrastructure flow share
pub struct FlowContext {
    /// `namespace/name` of the Infrastructure resource, for logging
    pub key: String,
    pub region: String,
    pub config: InfrastructureConfig,
    pub plan: InfrastructurePlan,
    pub cloud_profile: CloudProfileConfig,
    pub factory: Arc<dyn Factory>,
    pub whiteboard: Whiteboard,
}

impl FlowContext {
    /// ID of a resource recorded by an earlier task
    pub(crate) fn recorded_id(&self, key: &str) -> crate::Result<String> {
        self.whiteboard
            .get(key)
            .ok_or_else(|| crate::Error::internal(format!("{} was not recorded by an earlier task", key)))
    }
}

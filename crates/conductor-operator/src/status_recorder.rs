//! Component status written to the Platform resource

use std::sync::Arc;

use async_trait::async_trait;
use conductor_common::crd::{ComponentCondition, ComponentStatus};
use conductor_common::{Error, Result};
use conductor_lifecycle::StatusRecorder;
use tracing::debug;

use crate::client::PlatformClient;

/// [`StatusRecorder`] patching `status.components.<name>` on one Platform
pub struct PlatformStatusRecorder {
    client: Arc<dyn PlatformClient>,
    namespace: String,
    name: String,
}

impl PlatformStatusRecorder {
    /// Recorder for the Platform `namespace/name`
    pub fn new(client: Arc<dyn PlatformClient>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl StatusRecorder for PlatformStatusRecorder {
    async fn update_status(
        &self,
        component: &str,
        message: &str,
        condition: ComponentCondition,
    ) -> Result<()> {
        let entry = ComponentStatus::recorded(condition, message);
        let patch = serde_json::json!({ "components": { component: entry } });
        self.client
            .patch_status(&self.namespace, &self.name, patch)
            .await
            .map_err(|e| Error::status(component, e.to_string()))?;
        debug!(platform = %self.name, component, %condition, "Recorded component status");
        Ok(())
    }
}

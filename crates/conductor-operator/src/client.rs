//! Platform resource access for the controller
//!
//! Everything the reconciler writes back to its own custom resource goes
//! through [`PlatformClient`], so reconcile logic can be tested against a
//! mock.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

use conductor_common::crd::Platform;
use conductor_common::kube_utils::is_not_found;
use conductor_common::{Result, FIELD_MANAGER};

#[cfg(test)]
use mockall::automock;

/// Writes to Platform resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Add `finalizer` to the Platform, no-op when already present
    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<()>;

    /// Remove `finalizer` from the Platform, no-op when absent
    async fn remove_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<()>;

    /// Merge-patch `status` into the Platform's status subresource
    ///
    /// Only the fields present in `status` change, so callers can update a
    /// single component entry without clobbering the rest.
    async fn patch_status(&self, namespace: &str, name: &str, status: serde_json::Value) -> Result<()>;
}

/// [`PlatformClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePlatformClient {
    client: Client,
}

impl KubePlatformClient {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Platform> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PlatformClient for KubePlatformClient {
    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<()> {
        let api = self.api(namespace);
        let platform = api.get(name).await?;
        let mut finalizers = platform.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(platform = %name, finalizer, "Added finalizer");
        Ok(())
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<()> {
        let api = self.api(namespace);
        let platform = match api.get(name).await {
            Ok(p) => p,
            Err(e) if is_not_found(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let finalizers = platform.metadata.finalizers.unwrap_or_default();
        if !finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        let remaining: Vec<String> = finalizers.into_iter().filter(|f| f != finalizer).collect();

        let patch = serde_json::json!({ "metadata": { "finalizers": remaining } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(platform = %name, finalizer, "Removed finalizer");
        Ok(())
    }

    async fn patch_status(&self, namespace: &str, name: &str, status: serde_json::Value) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

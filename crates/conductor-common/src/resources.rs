//! Generic list/delete access to cluster resources
//!
//! Cleanup routines work on arbitrary kinds (custom resources left behind by
//! a component, for example), so they go through [`ResourceStore`] with
//! dynamic objects instead of typed APIs.

use async_trait::async_trait;
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::core::ApiResource;
use kube::{Api, Client};

use crate::kube_utils::{build_api_resource, is_not_found};
use crate::Result;

/// A resource type addressed by apiVersion and kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceKind {
    /// e.g. "apps/v1"
    pub api_version: String,
    /// e.g. "Deployment"
    pub kind: String,
}

impl ResourceKind {
    /// Build from apiVersion and kind
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    /// The [`ApiResource`] used for dynamic requests
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(&self.api_version, &self.kind)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// List and delete access to cluster resources
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List objects of `kind`, cluster-wide when `namespace` is None
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<String>,
        label_selector: Option<String>,
    ) -> Result<Vec<DynamicObject>>;

    /// Delete an object. Deleting an absent object succeeds.
    async fn delete(&self, kind: &ResourceKind, namespace: Option<String>, name: &str) -> Result<()>;

    /// Replace the object's finalizer list
    async fn set_finalizers(
        &self,
        kind: &ResourceKind,
        namespace: Option<String>,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()>;
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<String>,
        label_selector: Option<String>,
    ) -> Result<Vec<DynamicObject>> {
        let mut params = ListParams::default();
        if let Some(selector) = &label_selector {
            params = params.labels(selector);
        }
        let list = self.api(kind, namespace.as_deref()).list(&params).await?;
        Ok(list.items)
    }

    async fn delete(&self, kind: &ResourceKind, namespace: Option<String>, name: &str) -> Result<()> {
        match self
            .api(kind, namespace.as_deref())
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_finalizers(
        &self,
        kind: &ResourceKind,
        namespace: Option<String>,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        match self
            .api(kind, namespace.as_deref())
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

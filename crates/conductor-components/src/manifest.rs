//! Components shipped as pre-rendered manifests
//!
//! A manifest component is a directory of YAML documents plus the names of
//! the deployments that prove it is up. Install server-side applies every
//! document; uninstall deletes them again. Readiness is read off the
//! deployments' `Available` condition.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_common::kube_utils::{
    apply_object, delete_object, ensure_namespace, has_condition, kind_priority, parse_manifests,
    run_discovery, ManifestObject, CONDITION_AVAILABLE,
};
use conductor_common::resources::ResourceStore;
use conductor_common::{Error, Result, COMPONENT_LABEL, FIELD_MANAGER};
use conductor_lifecycle::{ComponentContext, ComponentHooks};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use serde::Deserialize;
use tracing::{debug, info};

use crate::cleanup::{run_rules, CleanupRule};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Cluster operations a manifest component needs
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ManifestClient: Send + Sync {
    /// Server-side apply `objects` in the given order
    async fn apply_all(&self, objects: &[ManifestObject]) -> Result<()>;

    /// Delete `objects`, last applied first
    async fn delete_all(&self, objects: &[ManifestObject]) -> Result<()>;

    /// Fetch a deployment, None when absent
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Create the namespace if missing
    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;
}

/// [`ManifestClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeManifestClient {
    client: Client,
    field_manager: String,
}

impl KubeManifestClient {
    /// Client applying as the operator's field manager
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: FIELD_MANAGER.to_string(),
        }
    }
}

#[async_trait]
impl ManifestClient for KubeManifestClient {
    async fn apply_all(&self, objects: &[ManifestObject]) -> Result<()> {
        // Namespaces and CRDs first, then re-discover so the new kinds resolve
        let (foundation, rest): (Vec<_>, Vec<_>) =
            objects.iter().partition(|o| kind_priority(&o.kind) <= 1);

        let mut discovery = run_discovery(&self.client).await?;
        for obj in &foundation {
            apply_object(&self.client, &discovery, obj, &self.field_manager).await?;
        }
        if !foundation.is_empty() && !rest.is_empty() {
            discovery = run_discovery(&self.client).await?;
        }
        for obj in &rest {
            apply_object(&self.client, &discovery, obj, &self.field_manager).await?;
        }
        Ok(())
    }

    async fn delete_all(&self, objects: &[ManifestObject]) -> Result<()> {
        let discovery = run_discovery(&self.client).await?;
        // CRDs stay: deleting them would take every user's custom resources along
        for obj in objects
            .iter()
            .rev()
            .filter(|o| o.kind != "CustomResourceDefinition")
        {
            delete_object(&self.client, &discovery, obj).await?;
        }
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        ensure_namespace(&self.client, namespace, &self.field_manager).await
    }
}

/// Cleanup rules run around uninstall
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSection {
    /// Run before the manifests are deleted
    #[serde(default)]
    pub pre_uninstall: Vec<CleanupRule>,
    /// Run once the component is gone
    #[serde(default)]
    pub post_uninstall: Vec<CleanupRule>,
}

/// Read every `.yaml`/`.yml` file in `dir`, in file name order
///
/// The combined list is re-sorted by kind priority so namespaces and CRDs
/// from any file are applied before the objects that need them.
pub fn load_manifest_dir(dir: &Path) -> Result<Vec<ManifestObject>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::config_at(dir.display().to_string(), e.to_string()))?;
    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();

    let mut objects = Vec::new();
    for file in files {
        let text = std::fs::read_to_string(&file)
            .map_err(|e| Error::config_at(file.display().to_string(), e.to_string()))?;
        let parsed = parse_manifests(&text).map_err(|e| {
            Error::config_at(file.display().to_string(), format!("invalid manifest: {e}"))
        })?;
        objects.extend(parsed);
    }
    objects.sort_by_key(|o| kind_priority(&o.kind));
    Ok(objects)
}

/// Stamp the owning component's label onto an object
fn label_object(mut obj: ManifestObject, component: &str) -> ManifestObject {
    if let Some(metadata) = obj.value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        let labels = metadata
            .entry("labels")
            .or_insert_with(|| serde_json::json!({}));
        if let Some(labels) = labels.as_object_mut() {
            labels.insert(COMPONENT_LABEL.to_string(), serde_json::json!(component));
        }
    }
    obj
}

/// [`ComponentHooks`] for a component made of static manifests
pub struct ManifestComponent {
    name: String,
    namespace: String,
    objects: Vec<ManifestObject>,
    availability: Vec<String>,
    cleanup: CleanupSection,
    manifests: Arc<dyn ManifestClient>,
    store: Arc<dyn ResourceStore>,
}

impl ManifestComponent {
    /// A component named `name` whose workloads run in `namespace`
    ///
    /// `availability` names the deployments (in `namespace`) that must exist
    /// and be Available; it may not be empty, otherwise install could never
    /// be observed.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        objects: Vec<ManifestObject>,
        availability: Vec<String>,
        manifests: Arc<dyn ManifestClient>,
        store: Arc<dyn ResourceStore>,
    ) -> Result<Self> {
        let name = name.into();
        if availability.is_empty() {
            return Err(Error::validation_for_field(
                &name,
                "availability.deployments",
                "at least one availability deployment is required",
            ));
        }
        let objects = objects
            .into_iter()
            .map(|o| label_object(o, &name))
            .collect();
        Ok(Self {
            name,
            namespace: namespace.into(),
            objects,
            availability,
            cleanup: CleanupSection::default(),
            manifests,
            store,
        })
    }

    /// Attach cleanup rules
    pub fn with_cleanup(mut self, cleanup: CleanupSection) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Objects applied on install, in apply order
    pub fn objects(&self) -> &[ManifestObject] {
        &self.objects
    }

    fn hook_error(&self, operation: &str, e: Error) -> Error {
        if e.is_retryable() {
            Error::component(&self.name, operation, e.to_string())
        } else {
            Error::component_permanent(&self.name, operation, e.to_string())
        }
    }

    async fn run_cleanup(&self, ctx: &ComponentContext, phase: &str, rules: &[CleanupRule]) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }
        if ctx.dry_run {
            info!(component = %self.name, rules = rules.len(), phase, "Dry run, skipping cleanup");
            return Ok(());
        }
        run_rules(self.store.as_ref(), &self.name, phase, rules).await
    }
}

#[async_trait]
impl ComponentHooks for ManifestComponent {
    async fn pre_install(&self, ctx: &ComponentContext) -> Result<()> {
        if ctx.dry_run {
            return Ok(());
        }
        self.manifests
            .ensure_namespace(&self.namespace)
            .await
            .map_err(|e| self.hook_error("pre-install", e))
    }

    async fn install(&self, ctx: &ComponentContext) -> Result<()> {
        if ctx.dry_run {
            info!(component = %self.name, objects = self.objects.len(), "Dry run, skipping apply");
            return Ok(());
        }
        self.manifests
            .apply_all(&self.objects)
            .await
            .map_err(|e| self.hook_error(&ctx.operation.to_string(), e))?;
        debug!(component = %self.name, objects = self.objects.len(), "Applied manifests");
        Ok(())
    }

    async fn pre_uninstall(&self, ctx: &ComponentContext) -> Result<()> {
        self.run_cleanup(ctx, "pre-uninstall", &self.cleanup.pre_uninstall)
            .await
    }

    async fn uninstall(&self, ctx: &ComponentContext) -> Result<()> {
        if ctx.dry_run {
            info!(component = %self.name, objects = self.objects.len(), "Dry run, skipping delete");
            return Ok(());
        }
        self.manifests
            .delete_all(&self.objects)
            .await
            .map_err(|e| self.hook_error("uninstall", e))
    }

    async fn post_uninstall(&self, ctx: &ComponentContext) -> Result<()> {
        self.run_cleanup(ctx, "post-uninstall", &self.cleanup.post_uninstall)
            .await
    }

    async fn is_installed(&self, _ctx: &ComponentContext) -> Result<bool> {
        for name in &self.availability {
            if self
                .manifests
                .get_deployment(&self.namespace, name)
                .await?
                .is_some()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn is_ready(&self, _ctx: &ComponentContext) -> bool {
        for name in &self.availability {
            match self.manifests.get_deployment(&self.namespace, name).await {
                Ok(Some(deployment)) => {
                    let conditions = deployment
                        .status
                        .as_ref()
                        .and_then(|s| s.conditions.as_deref());
                    if !has_condition(conditions, CONDITION_AVAILABLE) {
                        debug!(component = %self.name, deployment = %name, "Deployment not available yet");
                        return false;
                    }
                }
                Ok(None) => return false,
                Err(e) => {
                    debug!(component = %self.name, deployment = %name, error = %e, "Readiness check failed");
                    return false;
                }
            }
        }
        true
    }
}

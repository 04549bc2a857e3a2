//! Kubernetes helpers shared by the components and the operator
//!
//! Manifests are applied with server-side apply through API discovery so
//! component bundles may contain CRDs and custom resources alongside core
//! kinds.

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::ApiResource;
use kube::discovery::Discovery;
use kube::{Api, Client, Config};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// The "Available" condition type for deployments
pub const CONDITION_AVAILABLE: &str = "Available";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Types exposing the `type`/`status` pair of a Kubernetes condition
pub trait HasConditionFields {
    /// Condition type (e.g. "Available")
    fn type_field(&self) -> &str;
    /// Condition status ("True", "False", "Unknown")
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::apps::v1::DeploymentCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

impl HasConditionFields for k8s_openapi::api::core::v1::PodCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// True when a condition of `condition_type` exists with status "True"
pub fn has_condition<T: HasConditionFields>(conditions: Option<&[T]>, condition_type: &str) -> bool {
    conditions.is_some_and(|conds| {
        conds
            .iter()
            .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
    })
}

/// True for a 404 from the API server
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Create a kube client from an optional kubeconfig path
///
/// Without a path the in-cluster config (or `$KUBECONFIG`) is inferred.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config_at(path.display().to_string(), format!("failed to read kubeconfig: {e}"))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::config_at(path.display().to_string(), format!("failed to load kubeconfig: {e}"))
                })?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {e}")))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config)
        .map_err(|e| Error::internal_with_context("create_client", format!("failed to create client: {e}")))
}

/// Split an apiVersion into (group, version); core resources have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an [`ApiResource`] without discovery
///
/// The plural is guessed from the kind, which holds for every core kind
/// conductor touches. Use discovery for arbitrary custom resources.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Lowercase English plural of a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower == "endpoints" {
        return lower;
    }
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{lower}es")
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{lower}s")
    }
}

/// Apply order for a kind (lower first)
///
/// Namespaces and CRDs must exist before anything that lives in them, RBAC
/// before the workloads that use it.
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "NetworkPolicy" => 6,
        "Service" => 7,
        "Deployment" | "DaemonSet" | "StatefulSet" => 8,
        _ => 9,
    }
}

/// One object parsed out of a manifest bundle
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestObject {
    /// apiVersion of the object
    pub api_version: String,
    /// kind of the object
    pub kind: String,
    /// metadata.name
    pub name: String,
    /// metadata.namespace, None for cluster-scoped objects
    pub namespace: Option<String>,
    /// The full object
    pub value: serde_json::Value,
}

impl ManifestObject {
    fn from_value(value: serde_json::Value) -> Result<Self> {
        let field = |pointer: &str| value.pointer(pointer).and_then(|v| v.as_str()).map(String::from);
        let kind = field("/kind").ok_or_else(|| Error::serialization("manifest missing kind"))?;
        let api_version = field("/apiVersion")
            .ok_or_else(|| Error::serialization_for_kind(&kind, "manifest missing apiVersion"))?;
        let name = field("/metadata/name")
            .ok_or_else(|| Error::serialization_for_kind(&kind, "manifest missing metadata.name"))?;
        let namespace = field("/metadata/namespace");
        Ok(Self {
            api_version,
            kind,
            name,
            namespace,
            value,
        })
    }

    /// Group/version/kind for discovery lookups
    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = parse_api_version(&self.api_version);
        GroupVersionKind {
            group,
            version,
            kind: self.kind.clone(),
        }
    }
}

/// Parse a multi-document YAML bundle, sorted by [`kind_priority`]
///
/// Empty documents (a trailing `---`) are skipped. The sort is stable so
/// objects of equal priority keep their file order.
pub fn parse_manifests(yaml: &str) -> Result<Vec<ManifestObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_json::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(ManifestObject::from_value(value)?);
    }
    objects.sort_by_key(|o| kind_priority(&o.kind));
    Ok(objects)
}

/// Run API discovery, retrying while aggregated APIs register
pub async fn run_discovery(client: &Client) -> Result<Discovery> {
    let config = RetryConfig::with_max_attempts(5).initial_delay(Duration::from_secs(1));
    retry_with_backoff(&config, "api_discovery", || async {
        Discovery::new(client.clone()).run().await.map_err(Error::from)
    })
    .await
}

fn dynamic_api(client: &Client, discovery: &Discovery, obj: &ManifestObject) -> Result<Api<DynamicObject>> {
    let (api_resource, _caps) = discovery.resolve_gvk(&obj.gvk()).ok_or_else(|| {
        Error::internal_with_context(
            "discovery",
            format!("unknown resource type {}/{}", obj.api_version, obj.kind),
        )
    })?;
    Ok(match &obj.namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &api_resource),
        None => Api::all_with(client.clone(), &api_resource),
    })
}

/// Server-side apply one object, taking ownership of conflicting fields
pub async fn apply_object(
    client: &Client,
    discovery: &Discovery,
    obj: &ManifestObject,
    field_manager: &str,
) -> Result<()> {
    let api = dynamic_api(client, discovery, obj)?;
    api.patch(&obj.name, &PatchParams::apply(field_manager).force(), &Patch::Apply(&obj.value))
        .await?;
    trace!(kind = %obj.kind, name = %obj.name, namespace = ?obj.namespace, "applied object");
    Ok(())
}

/// Delete one object; an already-absent object or kind is not an error
pub async fn delete_object(client: &Client, discovery: &Discovery, obj: &ManifestObject) -> Result<()> {
    if discovery.resolve_gvk(&obj.gvk()).is_none() {
        debug!(kind = %obj.kind, name = %obj.name, "kind no longer served, nothing to delete");
        return Ok(());
    }
    let api = dynamic_api(client, discovery, obj)?;
    match api.delete(&obj.name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Ensure a namespace exists (server-side apply, idempotent)
pub async fn ensure_namespace(client: &Client, name: &str, field_manager: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    });
    api.patch(name, &PatchParams::apply(field_manager), &Patch::Apply(&ns))
        .await?;
    Ok(())
}

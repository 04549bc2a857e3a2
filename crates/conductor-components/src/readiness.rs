//! Readiness-gate health target
//!
//! A pod with readiness gates only becomes Ready once some controller sets
//! each gate's condition to True. When that controller wedges, the pods sit
//! unready forever; recycling the controller's own pod is enough to get it
//! going again.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_common::kube_utils::{is_not_found, STATUS_TRUE};
use conductor_common::Result;
use conductor_lifecycle::HealthTarget;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams};
use kube::{Api, Client};
use serde::Deserialize;
use tracing::{debug, info};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Pod access used by the readiness target
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait PodClient: Send + Sync {
    /// List pods in `namespace` matching `selector`
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;

    /// Delete a pod; an absent pod is not an error
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`PodClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePodClient {
    client: Client,
}

impl KubePodClient {
    /// Wrap a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Pods selected by namespace and labels
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSelector {
    /// Namespace to look in
    pub namespace: String,
    /// Label selector, e.g. "app=mysql"
    pub label_selector: String,
}

/// Catalog section binding a readiness-gate probe to a component
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessProbeConfig {
    /// Pods carrying the gates
    pub pods: PodSelector,
    /// Gate condition types that must be True
    pub gates: Vec<String>,
    /// Pods to delete when the gates stay unset
    pub operator: PodSelector,
}

/// Whether every gate in `gates` has a True condition on `pod`
fn gates_satisfied(pod: &Pod, gates: &[String]) -> bool {
    let conditions = pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    gates.iter().all(|gate| {
        conditions
            .iter()
            .any(|c| &c.type_ == gate && c.status == STATUS_TRUE)
    })
}

/// Health target over the readiness gates of a set of pods
pub struct ReadinessGateTarget {
    pods: Arc<dyn PodClient>,
    config: ReadinessProbeConfig,
}

impl ReadinessGateTarget {
    /// Target checking `config.gates` on `config.pods`
    pub fn new(pods: Arc<dyn PodClient>, config: ReadinessProbeConfig) -> Self {
        Self { pods, config }
    }
}

#[async_trait]
impl HealthTarget for ReadinessGateTarget {
    async fn is_healthy(&self) -> Result<bool> {
        let selector = &self.config.pods;
        let pods = self
            .pods
            .list(&selector.namespace, &selector.label_selector)
            .await?;

        // No pods means nothing is stuck waiting on a gate
        let stuck = pods
            .iter()
            .filter(|p| !gates_satisfied(p, &self.config.gates))
            .count();
        if stuck > 0 {
            debug!(
                namespace = %selector.namespace,
                selector = %selector.label_selector,
                stuck,
                "Pods waiting on readiness gates"
            );
        }
        Ok(stuck == 0)
    }

    async fn corrective_action(&self) -> Result<()> {
        let operator = &self.config.operator;
        let pods = self
            .pods
            .list(&operator.namespace, &operator.label_selector)
            .await?;
        for pod in pods {
            let Some(name) = pod.metadata.name else {
                continue;
            };
            info!(namespace = %operator.namespace, pod = %name, "Recycling operator pod");
            self.pods.delete(&operator.namespace, &name).await?;
        }
        Ok(())
    }
}

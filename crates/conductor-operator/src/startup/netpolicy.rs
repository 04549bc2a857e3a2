//! NetworkPolicy guarding the operator pods
//!
//! Ingress is limited to the webhook port from anywhere and the metrics port
//! from Prometheus in the monitoring namespace.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort,
    NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use conductor_common::{CONDUCTOR_SYSTEM_NAMESPACE, FIELD_MANAGER};

const POLICY_NAME: &str = "conductor-operator";
const OPERATOR_APP: &str = "conductor-operator";
const WEBHOOK_PORT: i32 = 9443;
const METRICS_PORT: i32 = 9100;
const MONITORING_NAMESPACE: &str = "monitoring";

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn selector(pairs: &[(&str, &str)]) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels(pairs)),
        ..Default::default()
    }
}

fn tcp(port: i32) -> NetworkPolicyPort {
    NetworkPolicyPort {
        port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// The NetworkPolicy applied at startup
pub fn operator_network_policy() -> NetworkPolicy {
    let webhook = NetworkPolicyIngressRule {
        ports: Some(vec![tcp(WEBHOOK_PORT)]),
        from: None,
    };
    let metrics = NetworkPolicyIngressRule {
        ports: Some(vec![tcp(METRICS_PORT)]),
        from: Some(vec![NetworkPolicyPeer {
            namespace_selector: Some(selector(&[(
                "kubernetes.io/metadata.name",
                MONITORING_NAMESPACE,
            )])),
            pod_selector: Some(selector(&[("app.kubernetes.io/name", "prometheus")])),
            ..Default::default()
        }]),
    };

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(POLICY_NAME.to_string()),
            namespace: Some(CONDUCTOR_SYSTEM_NAMESPACE.to_string()),
            labels: Some(labels(&[("app.kubernetes.io/managed-by", "conductor")])),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: selector(&[("app", OPERATOR_APP)]),
            policy_types: Some(vec!["Ingress".to_string()]),
            ingress: Some(vec![webhook, metrics]),
            ..Default::default()
        }),
    }
}

/// Create or update the operator NetworkPolicy
pub async fn ensure_operator_network_policy(client: &Client) -> anyhow::Result<()> {
    let api: Api<NetworkPolicy> = Api::namespaced(client.clone(), CONDUCTOR_SYSTEM_NAMESPACE);
    let params = PatchParams::apply(FIELD_MANAGER).force();

    api.patch(POLICY_NAME, &params, &Patch::Apply(&operator_network_policy()))
        .await
        .map_err(|e| anyhow::anyhow!("failed to apply operator NetworkPolicy: {}", e))?;
    tracing::info!(namespace = CONDUCTOR_SYSTEM_NAMESPACE, "Operator NetworkPolicy applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(rule: &NetworkPolicyIngressRule) -> Vec<i32> {
        rule.ports
            .iter()
            .flatten()
            .filter_map(|p| match p.port {
                Some(IntOrString::Int(port)) => Some(port),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn selects_operator_pods_in_system_namespace() {
        let policy = operator_network_policy();
        let spec = policy.spec.unwrap();

        assert_eq!(policy.metadata.namespace.as_deref(), Some(CONDUCTOR_SYSTEM_NAMESPACE));
        assert_eq!(
            spec.pod_selector.match_labels.unwrap().get("app").map(String::as_str),
            Some(OPERATOR_APP)
        );
        assert_eq!(spec.policy_types, Some(vec!["Ingress".to_string()]));
    }

    #[test]
    fn webhook_is_open_and_metrics_only_to_prometheus() {
        let ingress = operator_network_policy().spec.unwrap().ingress.unwrap();
        assert_eq!(ingress.len(), 2);

        assert_eq!(ports(&ingress[0]), vec![WEBHOOK_PORT]);
        assert!(ingress[0].from.is_none());

        assert_eq!(ports(&ingress[1]), vec![METRICS_PORT]);
        let peers = ingress[1].from.as_ref().unwrap();
        let ns = peers[0].namespace_selector.as_ref().unwrap();
        assert_eq!(
            ns.match_labels.as_ref().unwrap()["kubernetes.io/metadata.name"],
            MONITORING_NAMESPACE
        );
        assert!(peers[0].pod_selector.is_some());
    }
}

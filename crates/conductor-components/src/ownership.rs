//! Label-based detection of components owned by another controller

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_common::resources::{ResourceKind, ResourceStore};
use conductor_common::Result;
use conductor_lifecycle::ExternalOwnership;
use serde::Deserialize;

/// Catalog predicate: the component is externally managed while `namespace`
/// carries a label matching `label_selector`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipRule {
    /// Namespace whose labels are inspected
    pub namespace: String,
    /// Selector the namespace must match, e.g. "provisioner=rancher"
    pub label_selector: String,
    /// Logged when the component is skipped
    #[serde(default)]
    pub reason: Option<String>,
}

/// [`ExternalOwnership`] driven by per-component [`OwnershipRule`]s
///
/// Components without a rule are always managed by this operator.
pub struct LabelOwnership {
    store: Arc<dyn ResourceStore>,
    rules: HashMap<String, OwnershipRule>,
}

impl LabelOwnership {
    /// Ownership checks against `store`, no rules yet
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            rules: HashMap::new(),
        }
    }

    /// Attach a rule to `component`
    pub fn with_rule(mut self, component: impl Into<String>, rule: OwnershipRule) -> Self {
        self.rules.insert(component.into(), rule);
        self
    }

    /// Number of components with a rule
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no component has a rule
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl ExternalOwnership for LabelOwnership {
    async fn managed_externally(&self, component: &str) -> Result<Option<String>> {
        let Some(rule) = self.rules.get(component) else {
            return Ok(None);
        };
        let matching = self
            .store
            .list(
                &ResourceKind::new("v1", "Namespace"),
                None,
                Some(rule.label_selector.clone()),
            )
            .await?;
        let owned = matching
            .iter()
            .any(|ns| ns.metadata.name.as_deref() == Some(rule.namespace.as_str()));
        Ok(owned.then(|| {
            rule.reason.clone().unwrap_or_else(|| {
                format!("namespace {} matches {}", rule.namespace, rule.label_selector)
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_common::resources::MockResourceStore;
    use conductor_common::Error;
    use kube::api::DynamicObject;

    fn namespace(name: &str) -> DynamicObject {
        DynamicObject::new(name, &ResourceKind::new("v1", "Namespace").api_resource())
    }

    fn rule() -> OwnershipRule {
        OwnershipRule {
            namespace: "cattle-system".into(),
            label_selector: "provisioner=rancher".into(),
            reason: Some("cluster provisioned by rancher".into()),
        }
    }

    #[tokio::test]
    async fn component_without_rule_is_not_looked_up() {
        let mut store = MockResourceStore::new();
        store.expect_list().never();
        let ownership = LabelOwnership::new(Arc::new(store)).with_rule("rancher", rule());

        assert_eq!(ownership.managed_externally("keycloak").await.unwrap(), None);
    }

    #[tokio::test]
    async fn labelled_namespace_marks_component_external() {
        let mut store = MockResourceStore::new();
        store
            .expect_list()
            .withf(|kind, ns, selector| {
                kind.kind == "Namespace"
                    && ns.is_none()
                    && selector.as_deref() == Some("provisioner=rancher")
            })
            .returning(|_, _, _| Ok(vec![namespace("cattle-system")]));
        let ownership = LabelOwnership::new(Arc::new(store)).with_rule("rancher", rule());

        assert_eq!(
            ownership.managed_externally("rancher").await.unwrap().as_deref(),
            Some("cluster provisioned by rancher")
        );
    }

    #[tokio::test]
    async fn other_labelled_namespaces_do_not_count() {
        let mut store = MockResourceStore::new();
        store
            .expect_list()
            .returning(|_, _, _| Ok(vec![namespace("fleet-system")]));
        let ownership = LabelOwnership::new(Arc::new(store)).with_rule("rancher", rule());

        assert_eq!(ownership.managed_externally("rancher").await.unwrap(), None);
    }

    #[tokio::test]
    async fn default_reason_names_the_predicate() {
        let mut store = MockResourceStore::new();
        store
            .expect_list()
            .returning(|_, _, _| Ok(vec![namespace("cattle-system")]));
        let ownership = LabelOwnership::new(Arc::new(store)).with_rule(
            "rancher",
            OwnershipRule {
                reason: None,
                ..rule()
            },
        );

        let reason = ownership.managed_externally("rancher").await.unwrap().unwrap();
        assert!(reason.contains("cattle-system"));
        assert!(reason.contains("provisioner=rancher"));
    }

    #[tokio::test]
    async fn lookup_error_propagates() {
        let mut store = MockResourceStore::new();
        store
            .expect_list()
            .returning(|_, _, _| Err(Error::internal("apiserver unavailable")));
        let ownership = LabelOwnership::new(Arc::new(store)).with_rule("rancher", rule());

        assert!(ownership.managed_externally("rancher").await.is_err());
    }
}

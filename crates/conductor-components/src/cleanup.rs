//! Bulk deletion of resources a component leaves behind
//!
//! Some components create objects that their own uninstall does not remove
//! (custom resources written by an operator, bindings created by a UI). The
//! cleanup section of a catalog entry lists those kinds; the rules run from
//! the component's pre- or post-uninstall hook.

use conductor_common::resources::{ResourceKind, ResourceStore};
use conductor_common::{Error, Result};
use kube::api::DynamicObject;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Which objects of one kind to delete
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    /// Restrict to one namespace; cluster-wide when unset
    #[serde(default)]
    pub namespace: Option<String>,
    /// Label selector passed to the list call
    #[serde(default)]
    pub label_selector: Option<String>,
    /// Delete only objects whose name contains one of these substrings.
    /// Empty means every listed object.
    #[serde(default)]
    pub name_filter: Vec<String>,
    /// Strip finalizers containing this substring before deleting
    #[serde(default)]
    pub remove_finalizers: Option<String>,
}

impl DeleteOptions {
    fn matches(&self, name: &str) -> bool {
        self.name_filter.is_empty() || self.name_filter.iter().any(|f| name.contains(f.as_str()))
    }
}

/// One object that could not be cleaned up
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupFailure {
    /// Object name
    pub name: String,
    /// Rendered error
    pub message: String,
}

/// Result of one [`delete_resources`] call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Names of deleted objects
    pub deleted: Vec<String>,
    /// Per-object failures; the remaining objects were still processed
    pub errors: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// True when every matched object was deleted
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Delete every object of `kind` selected by `options`
///
/// Only a failed list call aborts. Finalizer stripping and deletion errors
/// are collected per object so one stuck object does not shield the rest.
/// Each object is deleted at most once per call.
pub async fn delete_resources(
    store: &dyn ResourceStore,
    kind: &ResourceKind,
    options: &DeleteOptions,
) -> Result<CleanupReport> {
    let objects = store
        .list(kind, options.namespace.clone(), options.label_selector.clone())
        .await?;

    let mut report = CleanupReport::default();
    for obj in objects.iter() {
        let Some(name) = obj.metadata.name.as_deref() else {
            continue;
        };
        if !options.matches(name) {
            continue;
        }
        let namespace = obj.metadata.namespace.clone();

        if let Some(pattern) = &options.remove_finalizers {
            if let Err(e) = strip_finalizers(store, kind, obj, name, pattern).await {
                warn!(%kind, name, error = %e, "Failed to remove finalizers");
                report.errors.push(CleanupFailure {
                    name: name.to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        }

        match store.delete(kind, namespace, name).await {
            Ok(()) => {
                debug!(%kind, name, "Deleted resource");
                report.deleted.push(name.to_string());
            }
            Err(e) => {
                warn!(%kind, name, error = %e, "Failed to delete resource");
                report.errors.push(CleanupFailure {
                    name: name.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

async fn strip_finalizers(
    store: &dyn ResourceStore,
    kind: &ResourceKind,
    obj: &DynamicObject,
    name: &str,
    pattern: &str,
) -> Result<()> {
    let current = obj.metadata.finalizers.clone().unwrap_or_default();
    let kept: Vec<String> = current
        .iter()
        .filter(|f| !f.contains(pattern))
        .cloned()
        .collect();
    if kept.len() == current.len() {
        return Ok(());
    }
    store
        .set_finalizers(kind, obj.metadata.namespace.clone(), name, kept)
        .await
}

/// A cleanup rule as written in the component catalog
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRule {
    /// apiVersion of the kind to clean up
    pub api_version: String,
    /// Kind to clean up
    pub kind: String,
    /// Selection within that kind
    #[serde(flatten)]
    pub options: DeleteOptions,
}

impl CleanupRule {
    /// The kind this rule targets
    pub fn resource_kind(&self) -> ResourceKind {
        ResourceKind::new(&self.api_version, &self.kind)
    }
}

/// Run every rule, failing if any object could not be removed
///
/// All rules run even after a failure. The returned error is retryable: the
/// hook is called again on the next reconcile and picks up what is left.
pub async fn run_rules(
    store: &dyn ResourceStore,
    component: &str,
    phase: &str,
    rules: &[CleanupRule],
) -> Result<()> {
    let mut failed = Vec::new();
    for rule in rules {
        let kind = rule.resource_kind();
        match delete_resources(store, &kind, &rule.options).await {
            Ok(report) => {
                if !report.deleted.is_empty() {
                    info!(component, %kind, count = report.deleted.len(), "Cleaned up resources");
                }
                failed.extend(report.errors.into_iter().map(|f| format!("{kind} {}: {}", f.name, f.message)));
            }
            Err(e) => failed.push(format!("{kind}: {e}")),
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::component(component, phase, failed.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_common::resources::MockResourceStore;
    use mockall::predicate::eq;
    use std::sync::{Arc, Mutex};

    fn crtb() -> ResourceKind {
        ResourceKind::new("management.cattle.io/v3", "ClusterRoleTemplateBinding")
    }

    fn object(name: &str, finalizers: &[&str]) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &crtb().api_resource()).within("local");
        if !finalizers.is_empty() {
            obj.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
        }
        obj
    }

    fn listing(objects: Vec<DynamicObject>) -> MockResourceStore {
        let mut store = MockResourceStore::new();
        store
            .expect_list()
            .returning(move |_, _, _| Ok(objects.clone()));
        store
    }

    #[tokio::test]
    async fn empty_filter_deletes_everything_listed() {
        let mut store = listing(vec![object("a", &[]), object("b", &[])]);
        store.expect_delete().times(2).returning(|_, _, _| Ok(()));

        let report = delete_resources(&store, &crtb(), &DeleteOptions::default())
            .await
            .unwrap();

        assert_eq!(report.deleted, vec!["a", "b"]);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn name_filter_matches_substrings() {
        let mut store = listing(vec![
            object("u-abc-admin", &[]),
            object("keep-me", &[]),
            object("u-def-member", &[]),
        ]);
        store
            .expect_delete()
            .withf(|_, _, name| name.starts_with("u-"))
            .times(2)
            .returning(|_, _, _| Ok(()));

        let options = DeleteOptions {
            name_filter: vec!["-admin".into(), "-member".into()],
            ..Default::default()
        };
        let report = delete_resources(&store, &crtb(), &options).await.unwrap();

        assert_eq!(report.deleted, vec!["u-abc-admin", "u-def-member"]);
    }

    /// An object matching two filters is still deleted only once.
    #[tokio::test]
    async fn overlapping_filters_delete_once() {
        let mut store = listing(vec![object("admin-member", &[])]);
        store.expect_delete().times(1).returning(|_, _, _| Ok(()));

        let options = DeleteOptions {
            name_filter: vec!["admin".into(), "member".into()],
            ..Default::default()
        };
        let report = delete_resources(&store, &crtb(), &options).await.unwrap();
        assert_eq!(report.deleted.len(), 1);
    }

    #[tokio::test]
    async fn list_options_are_forwarded() {
        let mut store = MockResourceStore::new();
        store
            .expect_list()
            .with(
                eq(crtb()),
                eq(Some("cattle-system".to_string())),
                eq(Some("cattle.io/creator=norman".to_string())),
            )
            .times(1)
            .returning(|_, _, _| Ok(vec![]));

        let options = DeleteOptions {
            namespace: Some("cattle-system".into()),
            label_selector: Some("cattle.io/creator=norman".into()),
            ..Default::default()
        };
        let report = delete_resources(&store, &crtb(), &options).await.unwrap();
        assert!(report.deleted.is_empty());
    }

    #[tokio::test]
    async fn list_failure_aborts() {
        let mut store = MockResourceStore::new();
        store
            .expect_list()
            .returning(|_, _, _| Err(Error::internal("apiserver unavailable")));

        let result = delete_resources(&store, &crtb(), &DeleteOptions::default()).await;
        assert!(result.is_err());
    }

    /// Story: one stuck object does not stop the rest from being deleted
    #[tokio::test]
    async fn story_per_item_failures_are_collected() {
        let mut store = listing(vec![object("a", &[]), object("stuck", &[]), object("c", &[])]);
        store.expect_delete().returning(|_, _, name| {
            if name == "stuck" {
                Err(Error::internal("admission webhook denied"))
            } else {
                Ok(())
            }
        });

        let report = delete_resources(&store, &crtb(), &DeleteOptions::default())
            .await
            .unwrap();

        assert_eq!(report.deleted, vec!["a", "c"]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].name, "stuck");
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn matching_finalizers_are_stripped_before_delete() {
        let patched = Arc::new(Mutex::new(Vec::new()));
        let seen = patched.clone();
        let mut store = listing(vec![object(
            "a",
            &["controller.cattle.io/mgmt-auth", "foregroundDeletion"],
        )]);
        store
            .expect_set_finalizers()
            .times(1)
            .returning(move |_, _, _, finalizers| {
                *seen.lock().unwrap() = finalizers;
                Ok(())
            });
        store.expect_delete().times(1).returning(|_, _, _| Ok(()));

        let options = DeleteOptions {
            remove_finalizers: Some("cattle.io".into()),
            ..Default::default()
        };
        delete_resources(&store, &crtb(), &options).await.unwrap();

        assert_eq!(*patched.lock().unwrap(), vec!["foregroundDeletion".to_string()]);
    }

    #[tokio::test]
    async fn objects_without_matching_finalizers_are_not_patched() {
        let mut store = listing(vec![object("a", &["foregroundDeletion"])]);
        store.expect_set_finalizers().never();
        store.expect_delete().times(1).returning(|_, _, _| Ok(()));

        let options = DeleteOptions {
            remove_finalizers: Some("cattle.io".into()),
            ..Default::default()
        };
        delete_resources(&store, &crtb(), &options).await.unwrap();
    }

    #[tokio::test]
    async fn rules_report_a_retryable_component_error() {
        let mut store = listing(vec![object("a", &[])]);
        store
            .expect_delete()
            .returning(|_, _, _| Err(Error::internal("timeout")));

        let rules = vec![CleanupRule {
            api_version: "management.cattle.io/v3".into(),
            kind: "ClusterRoleTemplateBinding".into(),
            options: DeleteOptions::default(),
        }];
        let err = run_rules(&store, "rancher", "post-uninstall", &rules)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.component_name(), Some("rancher"));
    }

    #[test]
    fn rule_parses_from_catalog_yaml() {
        let rule: CleanupRule = serde_yaml::from_str(
            r#"
apiVersion: management.cattle.io/v3
kind: ClusterRoleTemplateBinding
labelSelector: cattle.io/creator=norman
nameFilter: ["-admin"]
removeFinalizers: cattle.io
"#,
        )
        .unwrap();

        assert_eq!(rule.resource_kind(), crtb());
        assert_eq!(rule.options.namespace, None);
        assert_eq!(rule.options.name_filter, vec!["-admin"]);
        assert_eq!(rule.options.remove_finalizers.as_deref(), Some("cattle.io"));
    }
}

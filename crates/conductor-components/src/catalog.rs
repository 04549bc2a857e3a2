//! Component catalog
//!
//! The catalog is a YAML file listing every component the operator manages,
//! in install order:
//!
//! ```yaml
//! components:
//!   - name: cert-manager
//!     namespace: cert-manager
//!     manifests: cert-manager
//!     availability:
//!       deployments: [cert-manager, cert-manager-webhook]
//!   - name: keycloak
//!     namespace: keycloak
//!     manifests: keycloak
//!     dependencies: [cert-manager]
//!     availability:
//!       deployments: [keycloak]
//!     readinessProbe:
//!       pods: { namespace: keycloak, labelSelector: tier=mysql }
//!       gates: [gate1, gate2]
//!       operator: { namespace: mysql-operator, labelSelector: name=mysql-operator }
//! ```
//!
//! Manifest directories are resolved relative to the catalog file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use conductor_common::resources::ResourceStore;
use conductor_common::{Error, Result};
use conductor_lifecycle::{ComponentDescriptor, ComponentSet, SelfHealingProbe};
use serde::Deserialize;
use tracing::{debug, info};

use crate::manifest::{load_manifest_dir, CleanupSection, ManifestClient, ManifestComponent};
use crate::ownership::{LabelOwnership, OwnershipRule};
use crate::readiness::{PodClient, ReadinessGateTarget, ReadinessProbeConfig};

const CATALOG: &str = "catalog";

fn default_true() -> bool {
    true
}

/// Deployments that prove a component is up
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Availability {
    /// Deployment names in the component namespace
    #[serde(default)]
    pub deployments: Vec<String>,
}

/// One component as declared in the catalog
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Unique component name
    pub name: String,
    /// Namespace the component's workloads run in
    pub namespace: String,
    /// Manifest directory, relative to the catalog file
    pub manifests: PathBuf,
    /// Components that must be ready before this one installs
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// The operator may install and upgrade this component
    #[serde(default = "default_true")]
    pub operator_install: bool,
    /// The operator may uninstall this component
    #[serde(default = "default_true")]
    pub operator_uninstall: bool,
    /// Readiness criteria
    #[serde(default)]
    pub availability: Availability,
    /// Optional readiness-gate repair probe
    #[serde(default)]
    pub readiness_probe: Option<ReadinessProbeConfig>,
    /// Optional leftover cleanup
    #[serde(default)]
    pub cleanup: CleanupSection,
    /// Skip the component while this predicate holds
    #[serde(default)]
    pub externally_managed_by: Option<OwnershipRule>,
}

impl CatalogEntry {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new(&self.name)
            .depends_on(self.dependencies.iter().cloned())
            .operator_install(self.operator_install)
            .operator_uninstall(self.operator_uninstall)
    }
}

/// Cluster access handed to every catalog component
#[derive(Clone)]
pub struct Backends {
    /// Applies and deletes manifests
    pub manifests: Arc<dyn ManifestClient>,
    /// Generic list/delete for cleanup and ownership
    pub store: Arc<dyn ResourceStore>,
    /// Pod access for readiness-gate probes
    pub pods: Arc<dyn PodClient>,
}

/// What the operator needs from a built catalog
pub struct LoadedCatalog {
    /// Registered components in catalog order
    pub components: ComponentSet,
    /// Ownership predicates declared in the catalog
    pub ownership: LabelOwnership,
}

/// Parsed and validated catalog file
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Catalog {
    /// Components in registration order
    pub components: Vec<CatalogEntry>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Catalog {
    /// Read and validate the catalog at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config_at(path.display().to_string(), e.to_string()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let catalog = Self::from_yaml(&text, base_dir).map_err(|e| match e {
            Error::Serialization { message, .. } => {
                Error::config_at(path.display().to_string(), message)
            }
            other => other,
        })?;
        info!(path = %path.display(), components = catalog.components.len(), "Loaded component catalog");
        Ok(catalog)
    }

    /// Parse and validate catalog text; manifests resolve against `base_dir`
    pub fn from_yaml(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut catalog: Catalog = serde_yaml::from_str(text)?;
        catalog.base_dir = base_dir.into();
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check names and dependency order
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (i, entry) in self.components.iter().enumerate() {
            let field = |name: &str| format!("components[{i}].{name}");
            if entry.name.is_empty() {
                return Err(Error::validation_for_field(CATALOG, field("name"), "component name is empty"));
            }
            for dep in &entry.dependencies {
                if dep == &entry.name {
                    return Err(Error::validation_for_field(
                        &entry.name,
                        field("dependencies"),
                        "component depends on itself",
                    ));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(Error::validation_for_field(
                        &entry.name,
                        field("dependencies"),
                        format!("dependency '{dep}' must be listed before this component"),
                    ));
                }
            }
            if entry.availability.deployments.is_empty() {
                return Err(Error::validation_for_field(
                    &entry.name,
                    field("availability.deployments"),
                    "at least one availability deployment is required",
                ));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(Error::validation_for_field(
                    &entry.name,
                    field("name"),
                    "duplicate component name",
                ));
            }
        }
        Ok(())
    }

    /// Load every manifest directory and register the components
    pub fn build(&self, backends: &Backends) -> Result<LoadedCatalog> {
        let mut builder = ComponentSet::builder();
        let mut ownership = LabelOwnership::new(backends.store.clone());

        for entry in &self.components {
            let dir = self.base_dir.join(&entry.manifests);
            let objects = load_manifest_dir(&dir)?;
            debug!(component = %entry.name, objects = objects.len(), dir = %dir.display(), "Loaded manifests");

            let hooks = ManifestComponent::new(
                &entry.name,
                &entry.namespace,
                objects,
                entry.availability.deployments.clone(),
                backends.manifests.clone(),
                backends.store.clone(),
            )?
            .with_cleanup(entry.cleanup.clone());

            let probe = entry.readiness_probe.clone().map(|config| {
                SelfHealingProbe::new(
                    format!("{}-readiness-gates", entry.name),
                    Arc::new(ReadinessGateTarget::new(backends.pods.clone(), config)),
                )
            });

            if let Some(rule) = &entry.externally_managed_by {
                ownership = ownership.with_rule(&entry.name, rule.clone());
            }

            builder = builder.register_with_probe(entry.descriptor(), Arc::new(hooks), probe);
        }

        Ok(LoadedCatalog {
            components: builder.build()?,
            ownership,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MockManifestClient;
    use crate::readiness::MockPodClient;
    use conductor_common::resources::MockResourceStore;
    use rstest::rstest;

    const NAMESPACE_DOC: &str = "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: demo\n";

    fn backends() -> Backends {
        Backends {
            manifests: Arc::new(MockManifestClient::new()),
            store: Arc::new(MockResourceStore::new()),
            pods: Arc::new(MockPodClient::new()),
        }
    }

    fn entry_yaml(name: &str, deps: &[&str]) -> String {
        format!(
            "  - name: {name}\n    namespace: {name}\n    manifests: {name}\n    dependencies: [{}]\n    availability:\n      deployments: [{name}]\n",
            deps.join(", ")
        )
    }

    #[test]
    fn parses_defaults() {
        let catalog = Catalog::from_yaml(&format!("components:\n{}", entry_yaml("fluent", &[])), "/").unwrap();

        let entry = &catalog.components[0];
        assert!(entry.operator_install);
        assert!(entry.operator_uninstall);
        assert!(entry.readiness_probe.is_none());
        assert!(entry.externally_managed_by.is_none());
        assert_eq!(entry.cleanup, CleanupSection::default());
    }

    #[test]
    fn parses_optional_sections() {
        let text = r#"
components:
  - name: rancher
    namespace: cattle-system
    manifests: rancher
    operatorUninstall: false
    availability:
      deployments: [rancher]
    externallyManagedBy:
      namespace: cattle-system
      labelSelector: provisioner=rancher
    cleanup:
      postUninstall:
        - apiVersion: management.cattle.io/v3
          kind: ClusterRoleTemplateBinding
          labelSelector: cattle.io/creator=norman
"#;
        let catalog = Catalog::from_yaml(text, "/").unwrap();

        let entry = &catalog.components[0];
        assert!(!entry.operator_uninstall);
        assert_eq!(entry.cleanup.post_uninstall.len(), 1);
        assert_eq!(
            entry.externally_managed_by.as_ref().map(|r| r.label_selector.as_str()),
            Some("provisioner=rancher")
        );
    }

    #[rstest]
    #[case::duplicate(vec![entry_yaml("a", &[]), entry_yaml("a", &[])], "duplicate")]
    #[case::self_dependency(vec![entry_yaml("a", &["a"])], "itself")]
    #[case::later_dependency(vec![entry_yaml("a", &["b"]), entry_yaml("b", &[])], "listed before")]
    #[case::unknown_dependency(vec![entry_yaml("a", &["ghost"])], "listed before")]
    fn invalid_catalogs_are_rejected(#[case] entries: Vec<String>, #[case] expected: &str) {
        let text = format!("components:\n{}", entries.concat());

        let err = Catalog::from_yaml(&text, "/").unwrap_err();

        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[test]
    fn missing_availability_is_rejected() {
        let text = "components:\n  - name: a\n    namespace: a\n    manifests: a\n";
        let err = Catalog::from_yaml(text, "/").unwrap_err();
        assert!(matches!(err, Error::Validation { field: Some(ref f), .. } if f.ends_with("availability.deployments")));
    }

    /// Story: a catalog on disk becomes an ordered component set
    ///
    /// Manifest directories resolve next to the catalog, probes and
    /// ownership rules are attached to the components that declare them.
    #[test]
    fn story_catalog_on_disk_builds_the_component_set() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["cert-manager", "keycloak"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
            std::fs::write(dir.path().join(name).join("ns.yaml"), NAMESPACE_DOC).unwrap();
        }
        let catalog_path = dir.path().join("catalog.yaml");
        std::fs::write(
            &catalog_path,
            format!(
                "components:\n{}{}    readinessProbe:\n      pods: {{ namespace: keycloak, labelSelector: tier=mysql }}\n      gates: [gate1]\n      operator: {{ namespace: mysql-operator, labelSelector: name=mysql-operator }}\n    externallyManagedBy:\n      namespace: keycloak\n      labelSelector: managed-by=other\n",
                entry_yaml("cert-manager", &[]),
                entry_yaml("keycloak", &["cert-manager"]),
            ),
        )
        .unwrap();

        let loaded = Catalog::load(&catalog_path).unwrap().build(&backends()).unwrap();

        assert_eq!(loaded.components.names(), vec!["cert-manager", "keycloak"]);
        let keycloak = loaded.components.get("keycloak").unwrap();
        assert_eq!(keycloak.descriptor.dependencies, vec!["cert-manager"]);
        assert_eq!(
            keycloak.probe.as_ref().map(|p| p.name()),
            Some("keycloak-readiness-gates")
        );
        assert!(loaded.components.get("cert-manager").unwrap().probe.is_none());
        assert_eq!(loaded.ownership.len(), 1);
    }

    #[test]
    fn missing_manifest_dir_is_a_config_error() {
        let catalog = Catalog::from_yaml(&format!("components:\n{}", entry_yaml("ghost", &[])), "/nonexistent").unwrap();

        let err = catalog.build(&backends()).err().unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn missing_catalog_file_is_a_config_error() {
        let err = Catalog::load(Path::new("/nonexistent/catalog.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config { path: Some(_), .. }));
    }
}

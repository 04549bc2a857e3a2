//! Concrete components for the conductor lifecycle core
//!
//! The catalog turns a YAML file into a [`conductor_lifecycle::ComponentSet`]
//! of manifest-backed components, with optional readiness-gate probes,
//! cleanup rules and external-ownership predicates.

#![warn(missing_docs)]

pub mod catalog;
pub mod cleanup;
pub mod manifest;
pub mod ownership;
pub mod readiness;

pub use catalog::{Backends, Catalog, CatalogEntry, LoadedCatalog};
pub use cleanup::{delete_resources, CleanupReport, CleanupRule, DeleteOptions};
pub use manifest::{KubeManifestClient, ManifestClient, ManifestComponent};
pub use ownership::{LabelOwnership, OwnershipRule};
pub use readiness::{KubePodClient, PodClient, ReadinessGateTarget, ReadinessProbeConfig};

#[cfg(any(test, feature = "testing"))]
pub use manifest::MockManifestClient;
#[cfg(any(test, feature = "testing"))]
pub use readiness::MockPodClient;

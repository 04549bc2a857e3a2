//! Common types for conductor: the Platform CRD, errors, telemetry and
//! Kubernetes helpers

#![warn(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod resources;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the operator runs in
pub const CONDUCTOR_SYSTEM_NAMESPACE: &str = "conductor-system";

/// Field manager for every server-side apply issued by the operator
pub const FIELD_MANAGER: &str = "conductor-controller";

/// Finalizer holding a Platform until its components are uninstalled
pub const PLATFORM_FINALIZER: &str = "conductor.dev/platform-cleanup";

/// Label stamped on objects applied for a component
pub const COMPONENT_LABEL: &str = "conductor.dev/component";

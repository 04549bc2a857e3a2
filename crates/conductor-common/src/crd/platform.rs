//! Platform CRD
//!
//! A Platform is the single object a user creates to get the whole component
//! catalog installed. Deleting it tears every component down again before
//! the finalizer is released.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Desired state of the managed platform.
///
/// Example:
/// ```yaml
/// apiVersion: conductor.dev/v1alpha1
/// kind: Platform
/// metadata:
///   name: prod
///   namespace: conductor-system
/// spec:
///   version: "1.4.0"
///   disabledComponents:
///     - opensearch-operator
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "conductor.dev",
    version = "v1alpha1",
    kind = "Platform",
    namespaced,
    status = "PlatformStatus",
    shortname = "plat",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Target platform version; changing it on a Ready platform starts an upgrade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Catalog components that must not be installed on this platform
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_components: Vec<String>,
}

impl PlatformSpec {
    /// Whether the component is switched off for this platform
    pub fn is_disabled(&self, component: &str) -> bool {
        self.disabled_components.iter().any(|c| c == component)
    }
}

/// Overall platform phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PlatformPhase {
    /// Accepted, nothing done yet
    #[default]
    Pending,
    /// Install campaign running
    Installing,
    /// Upgrade campaign running
    Upgrading,
    /// Every enabled component installed and ready
    Ready,
    /// Platform deleted, uninstall campaign running
    Uninstalling,
    /// The last reconcile failed outright
    Failed,
}

impl std::fmt::Display for PlatformPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Installing => write!(f, "Installing"),
            Self::Upgrading => write!(f, "Upgrading"),
            Self::Ready => write!(f, "Ready"),
            Self::Uninstalling => write!(f, "Uninstalling"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Lifecycle milestone recorded for a component
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ComponentCondition {
    /// Install hooks are about to run
    InstallStarted,
    /// Installed and ready
    InstallComplete,
    /// Upgrade hooks are about to run
    UpgradeStarted,
    /// Upgraded and ready
    UpgradeComplete,
    /// Uninstall hooks are about to run
    UninstallStarted,
    /// Removed from the cluster
    UninstallComplete,
}

impl ComponentCondition {
    /// Phase a component is in once this condition is recorded
    pub fn phase(self) -> ComponentPhase {
        match self {
            Self::InstallStarted => ComponentPhase::Installing,
            Self::UpgradeStarted => ComponentPhase::Upgrading,
            Self::InstallComplete | Self::UpgradeComplete => ComponentPhase::Ready,
            Self::UninstallStarted => ComponentPhase::Uninstalling,
            Self::UninstallComplete => ComponentPhase::Uninstalled,
        }
    }
}

impl std::fmt::Display for ComponentCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InstallStarted => "InstallStarted",
            Self::InstallComplete => "InstallComplete",
            Self::UpgradeStarted => "UpgradeStarted",
            Self::UpgradeComplete => "UpgradeComplete",
            Self::UninstallStarted => "UninstallStarted",
            Self::UninstallComplete => "UninstallComplete",
        };
        f.write_str(s)
    }
}

/// Per-component phase as shown in the Platform status
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ComponentPhase {
    /// No status recorded yet
    #[default]
    NotInstalled,
    /// Install in progress
    Installing,
    /// Upgrade in progress
    Upgrading,
    /// Installed and ready
    Ready,
    /// Removal in progress
    Uninstalling,
    /// Removed
    Uninstalled,
}

/// Last recorded status of one component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Current phase
    #[serde(default)]
    pub phase: ComponentPhase,

    /// Last recorded milestone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ComponentCondition>,

    /// Human-readable message that came with the milestone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the milestone was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl ComponentStatus {
    /// Status entry for a newly recorded milestone
    pub fn recorded(condition: ComponentCondition, message: impl Into<String>) -> Self {
        Self {
            phase: condition.phase(),
            condition: Some(condition),
            message: Some(message.into()),
            last_transition_time: Some(Utc::now()),
        }
    }
}

/// Observed state of a Platform
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Overall phase
    #[serde(default)]
    pub phase: PlatformPhase,

    /// Human-readable summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Ready condition and friends
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-component status keyed by component name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentStatus>,

    /// Version the components were last installed or upgraded to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Generation of the spec last acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

//! Kubernetes Events for campaign milestones.
//!
//! Events are attached to the owning Platform so `kubectl describe platform`
//! shows when an install or uninstall campaign started, converged, or when
//! the self-healing probe recycled a pod. Publishing never fails the caller:
//! a rejected Event is logged and dropped.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Events about a Kubernetes object
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `regarding`
    ///
    /// `reason` is the machine-readable REASON column (see [`reasons`]),
    /// `action` what the controller did (see [`actions`]).
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` becomes the Event's reporting component
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Publisher that drops every Event (dry-run mode and tests)
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _regarding: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column
pub mod reasons {
    /// Install campaign began for a Platform
    pub const INSTALL_STARTED: &str = "InstallStarted";
    /// Every component installed and ready
    pub const INSTALL_COMPLETE: &str = "InstallComplete";
    /// Upgrade campaign began after the Platform version changed
    pub const UPGRADE_STARTED: &str = "UpgradeStarted";
    /// Every installed component upgraded and ready
    pub const UPGRADE_COMPLETE: &str = "UpgradeComplete";
    /// Uninstall campaign began after the Platform was deleted
    pub const UNINSTALL_STARTED: &str = "UninstallStarted";
    /// Every component removed; finalizer released
    pub const UNINSTALL_COMPLETE: &str = "UninstallComplete";
    /// A component hook failed and will be retried
    pub const COMPONENT_FAILED: &str = "ComponentFailed";
    /// The self-healing probe recycled a degraded resource
    pub const SELF_HEALED: &str = "SelfHealed";
}

/// Event actions
pub mod actions {
    /// Normal reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// Component install
    pub const INSTALL: &str = "Install";
    /// Component upgrade
    pub const UPGRADE: &str = "Upgrade";
    /// Component removal
    pub const UNINSTALL: &str = "Uninstall";
    /// Corrective action by a probe
    pub const REPAIR: &str = "Repair";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_pascal_case() {
        for reason in [
            reasons::INSTALL_STARTED,
            reasons::INSTALL_COMPLETE,
            reasons::UPGRADE_STARTED,
            reasons::UPGRADE_COMPLETE,
            reasons::UNINSTALL_STARTED,
            reasons::UNINSTALL_COMPLETE,
            reasons::COMPONENT_FAILED,
            reasons::SELF_HEALED,
        ] {
            assert!(reason.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
            assert!(!reason.contains(' ') && !reason.contains('_'));
        }
    }

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        let publisher: Box<dyn EventPublisher> = Box::new(NoopEventPublisher);
        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Normal,
                reasons::INSTALL_STARTED,
                actions::INSTALL,
                Some("starting".to_string()),
            )
            .await;
    }

    #[tokio::test]
    async fn mock_publisher_records_reason() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|_, _, reason, action, _| {
                reason == reasons::SELF_HEALED && action == actions::REPAIR
            })
            .times(1)
            .return_const(());
        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::SELF_HEALED,
                actions::REPAIR,
                None,
            )
            .await;
    }
}

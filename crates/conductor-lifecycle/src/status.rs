//! Collaborators the state machines report to or consult

use async_trait::async_trait;
use conductor_common::crd::ComponentCondition;
use conductor_common::Result;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Persists component milestones where users can see them
///
/// A failed update leaves the state machine where it was; the update is
/// attempted again on the next reconcile.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait StatusRecorder: Send + Sync {
    /// Record `condition` with a human-readable message for `component`
    async fn update_status(
        &self,
        component: &str,
        message: &str,
        condition: ComponentCondition,
    ) -> Result<()>;
}

/// Decides whether something outside conductor owns a component
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ExternalOwnership: Send + Sync {
    /// `Some(reason)` when another controller manages `component`
    async fn managed_externally(&self, component: &str) -> Result<Option<String>>;
}

/// Every component is owned by conductor
pub struct NoExternalOwnership;

#[async_trait]
impl ExternalOwnership for NoExternalOwnership {
    async fn managed_externally(&self, _component: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Recorder that only logs, for dry runs
pub struct LoggingStatusRecorder;

#[async_trait]
impl StatusRecorder for LoggingStatusRecorder {
    async fn update_status(
        &self,
        component: &str,
        message: &str,
        condition: ComponentCondition,
    ) -> Result<()> {
        tracing::info!(component, %condition, message, "component status");
        Ok(())
    }
}

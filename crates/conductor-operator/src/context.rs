//! Shared state for Platform reconciles

use std::sync::Arc;

use conductor_common::events::{EventPublisher, NoopEventPublisher};
use conductor_lifecycle::{
    ComponentSet, ExternalOwnership, InstallState, NoExternalOwnership, TrackerArena,
    UninstallState,
};

use crate::client::PlatformClient;
use crate::config::ControllerConfig;

/// Shared context for the Platform controller
///
/// Holds the immutable component set, the collaborators reconciles talk to,
/// and the trackers of every campaign in flight. Trackers survive between
/// reconciles but not across restarts; a fresh tracker re-derives progress
/// from the cluster.
pub struct Context {
    /// Writes to Platform resources
    pub platforms: Arc<dyn PlatformClient>,
    /// Every registered component, in registration order
    pub components: Arc<ComponentSet>,
    /// External-ownership predicate consulted before uninstall
    pub ownership: Arc<dyn ExternalOwnership>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Reconcile settings
    pub config: ControllerConfig,
    /// Install and upgrade campaigns, keyed by platform and operation
    pub install_trackers: TrackerArena<InstallState>,
    /// Uninstall campaigns, keyed by platform
    pub uninstall_trackers: TrackerArena<UninstallState>,
}

impl Context {
    /// Start building a context around the two required collaborators
    pub fn builder(platforms: Arc<dyn PlatformClient>, components: Arc<ComponentSet>) -> ContextBuilder {
        ContextBuilder {
            platforms,
            components,
            ownership: None,
            events: None,
            config: ControllerConfig::default(),
        }
    }
}

/// Builder for [`Context`]
///
/// ```text
/// let ctx = Context::builder(platforms, components)
///     .ownership(ownership)
///     .events(events)
///     .config(cli.controller_config())
///     .build();
/// ```
pub struct ContextBuilder {
    platforms: Arc<dyn PlatformClient>,
    components: Arc<ComponentSet>,
    ownership: Option<Arc<dyn ExternalOwnership>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    /// Set the external-ownership predicate (default: everything is ours)
    pub fn ownership(mut self, ownership: Arc<dyn ExternalOwnership>) -> Self {
        self.ownership = Some(ownership);
        self
    }

    /// Set the Event publisher (default: drop every Event)
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set reconcile settings
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            platforms: self.platforms,
            components: self.components,
            ownership: self
                .ownership
                .unwrap_or_else(|| Arc::new(NoExternalOwnership)),
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            config: self.config,
            install_trackers: TrackerArena::new(),
            uninstall_trackers: TrackerArena::new(),
        }
    }
}

//! Component lifecycle orchestration
//!
//! Each component moves through a small state machine per campaign
//! (install, upgrade or uninstall). The driver steps every component as far
//! as it can in one reconcile and reports whether another pass is needed;
//! waiting is expressed by returning control, never by blocking.

#![warn(missing_docs)]

pub mod component;
pub mod driver;
pub mod install;
pub mod machine;
pub mod probe;
pub mod status;
pub mod tracker;
pub mod uninstall;

pub use component::{
    ComponentContext, ComponentDescriptor, ComponentHooks, ComponentSet, ComponentSetBuilder,
    Operation, RegisteredComponent, UninstallOrder,
};
pub use driver::{run_install, run_probes, run_uninstall, run_upgrade, ComponentFailure, RunReport};
pub use install::{InstallMachine, InstallState};
pub use machine::{Campaign, LifecycleMachine, LifecycleState};
pub use probe::{HealthTarget, ProbeOutcome, SelfHealingProbe, DEFAULT_COOLDOWN};
pub use status::{ExternalOwnership, LoggingStatusRecorder, NoExternalOwnership, StatusRecorder};
pub use tracker::{CampaignKey, OnceLog, Tracker, TrackerArena};
pub use uninstall::{UninstallMachine, UninstallState};

#[cfg(any(test, feature = "testing"))]
pub use component::MockComponentHooks;
#[cfg(any(test, feature = "testing"))]
pub use probe::MockHealthTarget;
#[cfg(any(test, feature = "testing"))]
pub use status::{MockExternalOwnership, MockStatusRecorder};

//! The step contract shared by the install, upgrade and uninstall machines

use std::fmt::{Debug, Display};

use async_trait::async_trait;
use conductor_common::Result;

use crate::component::{ComponentContext, ComponentSet, RegisteredComponent};
use crate::status::{ExternalOwnership, StatusRecorder};
use crate::tracker::OnceLog;

/// State of a per-component machine
pub trait LifecycleState: Copy + Default + Eq + Debug + Display + Send + Sync {
    /// Nothing left to do for this component in this campaign
    fn is_terminal(&self) -> bool;
}

/// Everything a step may consult besides its own state
pub struct Campaign<'a> {
    /// Hook context for this campaign
    pub context: &'a ComponentContext,
    /// The full component set, for dependency lookups
    pub components: &'a ComponentSet,
    /// Where milestones are recorded
    pub status: &'a dyn StatusRecorder,
    /// External ownership predicate
    pub ownership: &'a dyn ExternalOwnership,
}

/// One transition function
///
/// `step` returns the next state. Returning the input state means "paused,
/// try again later". An error leaves the tracked state unchanged.
#[async_trait]
pub trait LifecycleMachine: Send + Sync {
    /// State type driven by this machine
    type State: LifecycleState;

    /// Apply one transition
    async fn step(
        &self,
        campaign: &Campaign<'_>,
        component: &RegisteredComponent,
        state: Self::State,
        once: &mut OnceLog,
    ) -> Result<Self::State>;
}

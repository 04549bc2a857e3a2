//! Uninstall state machine
//!
//! ```text
//! Start -> PreUninstall -> Uninstall -> WaitUninstalled -> Done -> End
//! ```
//!
//! Start re-derives "is installed" from the cluster, so a tracker lost on
//! restart simply begins again from Start.

use std::fmt;

use async_trait::async_trait;
use conductor_common::crd::ComponentCondition;
use conductor_common::Result;
use tracing::{debug, error, info, warn};

use crate::component::RegisteredComponent;
use crate::machine::{Campaign, LifecycleMachine, LifecycleState};
use crate::tracker::OnceLog;

/// Progress of one component through an uninstall campaign
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UninstallState {
    /// Decide whether there is anything to uninstall
    #[default]
    Start,
    /// Run the pre-uninstall hook
    PreUninstall,
    /// Ask the component to remove itself
    Uninstall,
    /// Poll until the component is gone, then run the post-uninstall hook
    WaitUninstalled,
    /// Record completion
    Done,
    /// Terminal
    End,
}

impl LifecycleState for UninstallState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for UninstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "Start",
            Self::PreUninstall => "PreUninstall",
            Self::Uninstall => "Uninstall",
            Self::WaitUninstalled => "WaitUninstalled",
            Self::Done => "Done",
            Self::End => "End",
        };
        f.write_str(s)
    }
}

/// Transition function for uninstall campaigns
#[derive(Clone, Copy, Debug, Default)]
pub struct UninstallMachine;

#[async_trait]
impl LifecycleMachine for UninstallMachine {
    type State = UninstallState;

    async fn step(
        &self,
        campaign: &Campaign<'_>,
        component: &RegisteredComponent,
        state: UninstallState,
        once: &mut OnceLog,
    ) -> Result<UninstallState> {
        let name = component.name();
        let ctx = campaign.context;
        let hooks = &component.hooks;

        match state {
            UninstallState::Start => {
                if !component.descriptor.supports_operator_uninstall {
                    return Ok(UninstallState::End);
                }
                if let Some(reason) = campaign.ownership.managed_externally(name).await? {
                    if once.first(format!("{name}/external")) {
                        info!(component = %name, %reason, "Component is managed externally, it will not be uninstalled");
                    }
                    return Ok(UninstallState::End);
                }
                let installed = match hooks.is_installed(ctx).await {
                    Ok(installed) => installed,
                    Err(e) => {
                        error!(component = %name, error = %e, "Failed checking if component is installed");
                        return Ok(UninstallState::End);
                    }
                };
                if !installed {
                    if once.first(format!("{name}/not-installed")) {
                        info!(component = %name, "Component is not installed, nothing to do for uninstall");
                    }
                    return Ok(UninstallState::End);
                }
                campaign
                    .status
                    .update_status(name, "Uninstall started", ComponentCondition::UninstallStarted)
                    .await?;
                if once.first(format!("{name}/starting")) {
                    info!(component = %name, "Component is starting to uninstall");
                }
                Ok(UninstallState::PreUninstall)
            }

            UninstallState::PreUninstall => {
                if once.first(format!("{name}/pre-uninstall")) {
                    info!(component = %name, "Component is calling pre-uninstall");
                }
                hooks.pre_uninstall(ctx).await?;
                Ok(UninstallState::Uninstall)
            }

            UninstallState::Uninstall => {
                debug!(component = %name, "Component is calling uninstall");
                hooks.uninstall(ctx).await?;
                Ok(UninstallState::WaitUninstalled)
            }

            UninstallState::WaitUninstalled => {
                if hooks.is_installed(ctx).await? {
                    debug!(component = %name, "Waiting for component to be uninstalled");
                    return Ok(state);
                }
                debug!(component = %name, "Component has been uninstalled, running post-uninstall");
                if let Err(e) = hooks.post_uninstall(ctx).await {
                    if e.is_retryable() {
                        warn!(component = %name, error = %e, "Post-uninstall failed, will retry");
                    } else {
                        error!(component = %name, error = %e, "Post-uninstall failed");
                    }
                    return Ok(state);
                }
                Ok(UninstallState::Done)
            }

            UninstallState::Done => {
                campaign
                    .status
                    .update_status(name, "Uninstall complete", ComponentCondition::UninstallComplete)
                    .await?;
                if once.first(format!("{name}/uninstalled")) {
                    info!(component = %name, "Component has successfully uninstalled");
                }
                Ok(UninstallState::End)
            }

            UninstallState::End => Ok(UninstallState::End),
        }
    }
}

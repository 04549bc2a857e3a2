//! Install and upgrade state machines
//!
//! ```text
//! Start -> PreInstall -> Install -> WaitReady -> Done -> End
//! ```
//!
//! Upgrade walks the same states with the upgrade hooks and only touches
//! components that are already installed.

use std::fmt;

use async_trait::async_trait;
use conductor_common::crd::ComponentCondition;
use conductor_common::Result;
use tracing::{debug, error, info, warn};

use crate::component::{ComponentContext, RegisteredComponent};
use crate::machine::{Campaign, LifecycleMachine, LifecycleState};
use crate::tracker::OnceLog;

/// Progress of one component through an install or upgrade campaign
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InstallState {
    /// Decide whether the component needs work and may start
    #[default]
    Start,
    /// Run the pre hook
    PreInstall,
    /// Run the install (or upgrade) hook
    Install,
    /// Poll until ready, then run the post hook
    WaitReady,
    /// Record completion
    Done,
    /// Terminal
    End,
}

impl LifecycleState for InstallState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "Start",
            Self::PreInstall => "PreInstall",
            Self::Install => "Install",
            Self::WaitReady => "WaitReady",
            Self::Done => "Done",
            Self::End => "End",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Install,
    Upgrade,
}

/// Transition function for install and upgrade campaigns
#[derive(Clone, Copy, Debug)]
pub struct InstallMachine {
    direction: Direction,
}

impl InstallMachine {
    /// Machine that installs missing components
    pub fn install() -> Self {
        Self {
            direction: Direction::Install,
        }
    }

    /// Machine that upgrades installed components
    pub fn upgrade() -> Self {
        Self {
            direction: Direction::Upgrade,
        }
    }

    fn milestones(&self) -> [(&'static str, ComponentCondition); 2] {
        match self.direction {
            Direction::Install => [
                ("Install started", ComponentCondition::InstallStarted),
                ("Install complete", ComponentCondition::InstallComplete),
            ],
            Direction::Upgrade => [
                ("Upgrade started", ComponentCondition::UpgradeStarted),
                ("Upgrade complete", ComponentCondition::UpgradeComplete),
            ],
        }
    }

    /// Dependencies that are enabled but not ready yet
    async fn pending_dependencies(
        &self,
        campaign: &Campaign<'_>,
        component: &RegisteredComponent,
    ) -> Vec<String> {
        let mut pending = Vec::new();
        for dep in &component.descriptor.dependencies {
            // A disabled dependency can never become ready
            if campaign.context.is_disabled(dep) {
                continue;
            }
            let ready = match campaign.components.get(dep) {
                Some(registered) => registered.hooks.is_ready(campaign.context).await,
                None => false,
            };
            if !ready {
                pending.push(dep.clone());
            }
        }
        pending
    }

    async fn start(
        &self,
        campaign: &Campaign<'_>,
        component: &RegisteredComponent,
        once: &mut OnceLog,
    ) -> Result<InstallState> {
        let name = component.name();
        let ctx = campaign.context;
        let hooks = &component.hooks;

        if !component.descriptor.supports_operator_install {
            return Ok(InstallState::End);
        }
        if ctx.is_disabled(name) {
            if once.first(format!("{name}/disabled")) {
                info!(component = %name, "Component is disabled for this platform");
            }
            return Ok(InstallState::End);
        }

        match self.direction {
            Direction::Install => {
                let pending = self.pending_dependencies(campaign, component).await;
                if !pending.is_empty() {
                    debug!(component = %name, ?pending, "Waiting for dependencies to be ready");
                    return Ok(InstallState::Start);
                }
                if hooks.is_installed(ctx).await? && hooks.is_ready(ctx).await {
                    if once.first(format!("{name}/already-installed")) {
                        info!(component = %name, "Component is already installed and ready");
                    }
                    return Ok(InstallState::End);
                }
            }
            Direction::Upgrade => {
                if !hooks.is_installed(ctx).await? {
                    if once.first(format!("{name}/not-installed")) {
                        info!(component = %name, "Component is not installed, nothing to upgrade");
                    }
                    return Ok(InstallState::End);
                }
            }
        }

        let [(message, condition), _] = self.milestones();
        campaign.status.update_status(name, message, condition).await?;
        if once.first(format!("{name}/starting")) {
            info!(component = %name, operation = %ctx.operation, "Component is starting");
        }
        Ok(InstallState::PreInstall)
    }

    async fn pre(&self, component: &RegisteredComponent, ctx: &ComponentContext) -> Result<()> {
        match self.direction {
            Direction::Install => component.hooks.pre_install(ctx).await,
            Direction::Upgrade => component.hooks.pre_upgrade(ctx).await,
        }
    }

    async fn act(&self, component: &RegisteredComponent, ctx: &ComponentContext) -> Result<()> {
        match self.direction {
            Direction::Install => component.hooks.install(ctx).await,
            Direction::Upgrade => component.hooks.upgrade(ctx).await,
        }
    }

    async fn post(&self, component: &RegisteredComponent, ctx: &ComponentContext) -> Result<()> {
        match self.direction {
            Direction::Install => component.hooks.post_install(ctx).await,
            Direction::Upgrade => component.hooks.post_upgrade(ctx).await,
        }
    }
}

#[async_trait]
impl LifecycleMachine for InstallMachine {
    type State = InstallState;

    async fn step(
        &self,
        campaign: &Campaign<'_>,
        component: &RegisteredComponent,
        state: InstallState,
        once: &mut OnceLog,
    ) -> Result<InstallState> {
        let name = component.name();
        let ctx = campaign.context;

        match state {
            InstallState::Start => self.start(campaign, component, once).await,

            InstallState::PreInstall => {
                self.pre(component, ctx).await?;
                Ok(InstallState::Install)
            }

            InstallState::Install => {
                debug!(component = %name, operation = %ctx.operation, "Component is calling its hook");
                self.act(component, ctx).await?;
                Ok(InstallState::WaitReady)
            }

            InstallState::WaitReady => {
                if !component.hooks.is_ready(ctx).await {
                    debug!(component = %name, "Waiting for component to be ready");
                    return Ok(state);
                }
                if let Err(e) = self.post(component, ctx).await {
                    if e.is_retryable() {
                        warn!(component = %name, error = %e, "Post hook failed, will retry");
                    } else {
                        error!(component = %name, error = %e, "Post hook failed");
                    }
                    return Ok(state);
                }
                Ok(InstallState::Done)
            }

            InstallState::Done => {
                let [_, (message, condition)] = self.milestones();
                campaign.status.update_status(name, message, condition).await?;
                if once.first(format!("{name}/complete")) {
                    info!(component = %name, operation = %ctx.operation, "Component is ready");
                }
                Ok(InstallState::End)
            }

            InstallState::End => Ok(InstallState::End),
        }
    }
}

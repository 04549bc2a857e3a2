//! Campaign driver
//!
//! Walks the component set once per reconcile, steps every component as far
//! as it will go, and tells the caller whether another pass is needed. One
//! component's failure never stops the others.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, warn};

use crate::component::{ComponentSet, RegisteredComponent, UninstallOrder};
use crate::install::{InstallMachine, InstallState};
use crate::machine::{Campaign, LifecycleMachine, LifecycleState};
use crate::probe::ProbeOutcome;
use crate::tracker::Tracker;
use crate::uninstall::{UninstallMachine, UninstallState};

/// A component step that returned an error during a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentFailure {
    /// Component name
    pub component: String,
    /// State the component stays in
    pub state: String,
    /// Error message
    pub message: String,
    /// Retryable classification of the error
    pub retryable: bool,
}

/// Result of one pass over the component set
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Some component is paused or failed; run again later
    pub requeue_required: bool,
    /// Components that returned an error in this pass
    pub failures: Vec<ComponentFailure>,
}

impl RunReport {
    /// Every component reached its terminal state
    pub fn converged(&self) -> bool {
        !self.requeue_required
    }

    fn record_failure(&mut self, component: &str, state: impl ToString, err: &conductor_common::Error) {
        self.requeue_required = true;
        self.failures.push(ComponentFailure {
            component: component.to_string(),
            state: state.to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        });
    }
}

/// Drive `components` through `machine`, in the given order
pub async fn run<'c, M, I>(
    machine: &M,
    campaign: &Campaign<'_>,
    components: I,
    tracker: &mut Tracker<M::State>,
) -> RunReport
where
    M: LifecycleMachine,
    I: IntoIterator<Item = &'c RegisteredComponent>,
{
    let mut report = RunReport::default();

    for component in components {
        let name = component.name();
        let mut state = tracker.state(name);

        while !state.is_terminal() {
            match machine.step(campaign, component, state, tracker.once()).await {
                Ok(next) if next == state => {
                    debug!(component = %name, %state, "Component paused");
                    report.requeue_required = true;
                    break;
                }
                Ok(next) => {
                    debug!(component = %name, from = %state, to = %next, "Component advanced");
                    state = next;
                    tracker.set(name, state);
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(component = %name, %state, error = %e, "Component step failed, will retry");
                    } else {
                        error!(component = %name, %state, error = %e, "Component step failed");
                    }
                    report.record_failure(name, state, &e);
                    break;
                }
            }
        }
    }
    report
}

/// One install pass in registration order
pub async fn run_install(campaign: &Campaign<'_>, tracker: &mut Tracker<InstallState>) -> RunReport {
    run(&InstallMachine::install(), campaign, campaign.components.iter(), tracker).await
}

/// One upgrade pass in registration order
pub async fn run_upgrade(campaign: &Campaign<'_>, tracker: &mut Tracker<InstallState>) -> RunReport {
    run(&InstallMachine::upgrade(), campaign, campaign.components.iter(), tracker).await
}

/// One uninstall pass in `order`
pub async fn run_uninstall(
    campaign: &Campaign<'_>,
    tracker: &mut Tracker<UninstallState>,
    order: UninstallOrder,
) -> RunReport {
    run(&UninstallMachine, campaign, campaign.components.in_order(order), tracker).await
}

/// Evaluate every attached self-healing probe once
///
/// Probe errors are reported like step failures: logged, requeued, and never
/// blocking the remaining probes.
pub async fn run_probes(components: &ComponentSet, now: DateTime<Utc>, cooldown: Duration) -> (RunReport, Vec<(String, ProbeOutcome)>) {
    let mut report = RunReport::default();
    let mut outcomes = Vec::new();

    for component in components.iter() {
        let Some(probe) = &component.probe else {
            continue;
        };
        match probe.repair(now, cooldown).await {
            Ok(outcome) => {
                // An armed or waiting probe needs another look later
                if matches!(outcome, ProbeOutcome::Armed | ProbeOutcome::Waiting) {
                    report.requeue_required = true;
                }
                outcomes.push((component.name().to_string(), outcome));
            }
            Err(e) => {
                warn!(component = %component.name(), probe = %probe.name(), error = %e, "Self-healing probe failed");
                report.record_failure(component.name(), "Probe", &e);
            }
        }
    }
    (report, outcomes)
}

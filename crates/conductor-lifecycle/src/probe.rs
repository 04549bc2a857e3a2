//! Self-healing probe with a throttled corrective action
//!
//! The first unhealthy observation only arms a timer, giving the target a
//! chance to recover on its own. If it is still unhealthy once the cooldown
//! has elapsed the corrective action runs and the timer is cleared. Any
//! healthy observation clears the timer as well.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use conductor_common::Result;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Default minimum interval between two corrective actions
pub const DEFAULT_COOLDOWN: Duration = Duration::hours(1);

/// The resource a probe watches and repairs
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait HealthTarget: Send + Sync {
    /// True when every observed sub-condition is healthy
    async fn is_healthy(&self) -> Result<bool>;

    /// Recycle the degraded resource so its controller recreates it
    async fn corrective_action(&self) -> Result<()>;
}

/// What a call to [`SelfHealingProbe::repair`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Target healthy; timer cleared
    Healthy,
    /// First unhealthy observation; timer started
    Armed,
    /// Still unhealthy, still inside the cooldown
    Waiting,
    /// Cooldown elapsed; corrective action taken and timer cleared
    Repaired,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Armed => write!(f, "armed"),
            Self::Waiting => write!(f, "waiting"),
            Self::Repaired => write!(f, "repaired"),
        }
    }
}

/// Decision for one observation, before any side effect
fn decide(last_action: Option<DateTime<Utc>>, healthy: bool, now: DateTime<Utc>, cooldown: Duration) -> ProbeOutcome {
    match (healthy, last_action) {
        (true, _) => ProbeOutcome::Healthy,
        (false, None) => ProbeOutcome::Armed,
        (false, Some(last)) if now - last < cooldown => ProbeOutcome::Waiting,
        (false, Some(_)) => ProbeOutcome::Repaired,
    }
}

/// Timer-gated corrective action bound to one component
///
/// A probe is shared by every Platform reconcile, so `repair` calls on the
/// same probe run one at a time.
pub struct SelfHealingProbe {
    name: String,
    target: Arc<dyn HealthTarget>,
    last_action: Mutex<Option<DateTime<Utc>>>,
    // Held for a whole observe-and-act cycle
    in_flight: tokio::sync::Mutex<()>,
}

impl fmt::Debug for SelfHealingProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfHealingProbe")
            .field("name", &self.name)
            .field("last_action", &*self.last_action.lock())
            .finish()
    }
}

impl SelfHealingProbe {
    /// Probe named `name` watching `target`
    pub fn new(name: impl Into<String>, target: Arc<dyn HealthTarget>) -> Self {
        Self {
            name: name.into(),
            target,
            last_action: Mutex::new(None),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    /// Probe name, used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the timer was armed, None when re-armed
    pub fn last_action(&self) -> Option<DateTime<Utc>> {
        *self.last_action.lock()
    }

    /// Observe the target once and act on it
    ///
    /// Safe to call on every reconcile. A failed corrective action keeps the
    /// timer, so the action is attempted again on the next call. Overlapping
    /// calls wait for each other, so the action fires at most once per
    /// cooldown window.
    pub async fn repair(&self, now: DateTime<Utc>, cooldown: Duration) -> Result<ProbeOutcome> {
        let _serial = self.in_flight.lock().await;
        let healthy = self.target.is_healthy().await?;
        let last = self.last_action();
        let outcome = decide(last, healthy, now, cooldown);

        match outcome {
            ProbeOutcome::Healthy => {
                if last.is_some() {
                    info!(probe = %self.name, "Target recovered, re-arming probe");
                }
                *self.last_action.lock() = None;
            }
            ProbeOutcome::Armed => {
                debug!(probe = %self.name, "Target unhealthy, starting cooldown timer");
                *self.last_action.lock() = Some(now);
            }
            ProbeOutcome::Waiting => {
                debug!(probe = %self.name, "Target unhealthy, waiting for cooldown to elapse");
            }
            ProbeOutcome::Repaired => {
                warn!(probe = %self.name, "Target still unhealthy after cooldown, taking corrective action");
                self.target.corrective_action().await?;
                *self.last_action.lock() = None;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_common::Error;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::minutes(minutes)
    }

    #[rstest]
    #[case::healthy_clears(Some(at(0)), true, at(90), ProbeOutcome::Healthy)]
    #[case::first_unhealthy_arms(None, false, at(0), ProbeOutcome::Armed)]
    #[case::inside_window(Some(at(0)), false, at(59), ProbeOutcome::Waiting)]
    #[case::window_elapsed(Some(at(0)), false, at(60), ProbeOutcome::Repaired)]
    fn decision_table(
        #[case] last: Option<DateTime<Utc>>,
        #[case] healthy: bool,
        #[case] now: DateTime<Utc>,
        #[case] expected: ProbeOutcome,
    ) {
        assert_eq!(decide(last, healthy, now, DEFAULT_COOLDOWN), expected);
    }

    /// Story: a readiness gate that stays false gets its operator pod recycled
    ///
    /// The first call only arms the timer, a call inside the hour does
    /// nothing, and the first call after the hour deletes the pod once.
    #[tokio::test]
    async fn story_persistent_failure_is_repaired_once_per_cooldown() {
        let mut target = MockHealthTarget::new();
        target.expect_is_healthy().times(3).returning(|| Ok(false));
        target.expect_corrective_action().times(1).returning(|| Ok(()));
        let probe = SelfHealingProbe::new("mysql-readiness", Arc::new(target));

        assert_eq!(probe.repair(at(0), DEFAULT_COOLDOWN).await.unwrap(), ProbeOutcome::Armed);
        assert_eq!(probe.last_action(), Some(at(0)));
        assert_eq!(probe.repair(at(30), DEFAULT_COOLDOWN).await.unwrap(), ProbeOutcome::Waiting);
        assert_eq!(probe.last_action(), Some(at(0)));
        assert_eq!(probe.repair(at(61), DEFAULT_COOLDOWN).await.unwrap(), ProbeOutcome::Repaired);
        assert_eq!(probe.last_action(), None);
    }

    #[tokio::test]
    async fn healthy_observation_rearms() {
        let mut target = MockHealthTarget::new();
        let mut seq = mockall::Sequence::new();
        target
            .expect_is_healthy()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(false));
        target
            .expect_is_healthy()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(true));
        let probe = SelfHealingProbe::new("mysql-readiness", Arc::new(target));

        probe.repair(at(0), DEFAULT_COOLDOWN).await.unwrap();
        assert!(probe.last_action().is_some());
        assert_eq!(probe.repair(at(120), DEFAULT_COOLDOWN).await.unwrap(), ProbeOutcome::Healthy);
        assert_eq!(probe.last_action(), None);
    }

    #[tokio::test]
    async fn failed_corrective_action_keeps_timer() {
        let mut target = MockHealthTarget::new();
        target.expect_is_healthy().returning(|| Ok(false));
        target
            .expect_corrective_action()
            .times(2)
            .returning(|| Err(Error::internal_with_context("probe", "pod delete forbidden")));
        let probe = SelfHealingProbe::new("mysql-readiness", Arc::new(target));

        probe.repair(at(0), DEFAULT_COOLDOWN).await.unwrap();
        assert!(probe.repair(at(61), DEFAULT_COOLDOWN).await.is_err());
        assert_eq!(probe.last_action(), Some(at(0)));
        assert!(probe.repair(at(62), DEFAULT_COOLDOWN).await.is_err());
    }

    /// Target that yields inside every call, so overlapping repairs interleave
    #[derive(Default)]
    struct SlowUnhealthyTarget {
        actions: AtomicUsize,
    }

    #[async_trait]
    impl HealthTarget for SlowUnhealthyTarget {
        async fn is_healthy(&self) -> Result<bool> {
            tokio::task::yield_now().await;
            Ok(false)
        }

        async fn corrective_action(&self) -> Result<()> {
            tokio::task::yield_now().await;
            self.actions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Story: two Platforms reconcile at once after the cooldown elapsed
    ///
    /// Only one of them recycles the pods; the other sees the re-armed probe.
    #[tokio::test]
    async fn overlapping_repairs_act_once() {
        let target = Arc::new(SlowUnhealthyTarget::default());
        let probe = SelfHealingProbe::new("mysql-readiness", target.clone());
        probe.repair(at(0), DEFAULT_COOLDOWN).await.unwrap();

        let (first, second) = tokio::join!(
            probe.repair(at(61), DEFAULT_COOLDOWN),
            probe.repair(at(61), DEFAULT_COOLDOWN),
        );

        let outcomes = [first.unwrap(), second.unwrap()];
        assert_eq!(target.actions.load(Ordering::SeqCst), 1);
        assert!(outcomes.contains(&ProbeOutcome::Repaired));
        assert!(outcomes.contains(&ProbeOutcome::Armed));
    }

    #[tokio::test]
    async fn health_check_error_changes_nothing() {
        let mut target = MockHealthTarget::new();
        target
            .expect_is_healthy()
            .returning(|| Err(Error::internal("pod list failed")));
        let probe = SelfHealingProbe::new("mysql-readiness", Arc::new(target));
        assert!(probe.repair(at(0), DEFAULT_COOLDOWN).await.is_err());
        assert_eq!(probe.last_action(), None);
    }
}

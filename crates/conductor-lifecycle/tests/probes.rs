//! Self-healing probe timing through the public API

mod common;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::ScriptedTarget;
use conductor_lifecycle::{
    run_probes, ComponentDescriptor, ComponentSet, ProbeOutcome, SelfHealingProbe,
};

fn minutes(m: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::minutes(m)
}

/// A target that flaps back to healthy never triggers the corrective action,
/// and the timer is cleared again afterwards.
#[tokio::test]
async fn flapping_target_is_never_repaired() {
    let target = ScriptedTarget::new([true, false, true]);
    let probe = SelfHealingProbe::new("readiness-gates", target.clone());
    let cooldown = Duration::hours(1);

    assert_eq!(probe.repair(minutes(0), cooldown).await.unwrap(), ProbeOutcome::Healthy);
    assert_eq!(probe.repair(minutes(10), cooldown).await.unwrap(), ProbeOutcome::Armed);
    assert_eq!(probe.last_action(), Some(minutes(10)));
    // Far beyond the cooldown, but healthy again
    assert_eq!(probe.repair(minutes(500), cooldown).await.unwrap(), ProbeOutcome::Healthy);

    assert_eq!(target.actions(), 0);
    assert_eq!(probe.last_action(), None);
}

/// A target that stays unhealthy is armed, then left alone inside the
/// cooldown, then repaired exactly once.
#[tokio::test]
async fn persistent_failure_is_repaired_after_cooldown() {
    let target = ScriptedTarget::new([false, false, false]);
    let probe = SelfHealingProbe::new("readiness-gates", target.clone());
    let cooldown = Duration::hours(1);

    assert_eq!(probe.repair(minutes(0), cooldown).await.unwrap(), ProbeOutcome::Armed);
    assert_eq!(probe.repair(minutes(59), cooldown).await.unwrap(), ProbeOutcome::Waiting);
    assert_eq!(target.actions(), 0);
    assert_eq!(probe.repair(minutes(60), cooldown).await.unwrap(), ProbeOutcome::Repaired);

    assert_eq!(target.actions(), 1);
    assert_eq!(probe.last_action(), None);
}

/// After a repair the next unhealthy observation starts a fresh window.
#[tokio::test]
async fn repair_rearms_for_the_next_window() {
    let target = ScriptedTarget::new([false, false, false, false]);
    let probe = SelfHealingProbe::new("readiness-gates", target.clone());
    let cooldown = Duration::minutes(5);

    probe.repair(minutes(0), cooldown).await.unwrap();
    probe.repair(minutes(5), cooldown).await.unwrap();
    assert_eq!(probe.repair(minutes(6), cooldown).await.unwrap(), ProbeOutcome::Armed);
    assert_eq!(probe.repair(minutes(7), cooldown).await.unwrap(), ProbeOutcome::Waiting);
    assert_eq!(target.actions(), 1);
}

/// Probes attached at registration are evaluated by the driver.
#[tokio::test]
async fn driver_evaluates_attached_probes() {
    let target = ScriptedTarget::new([true]);
    let set = ComponentSet::builder()
        .register_with_probe(
            ComponentDescriptor::new("mysql"),
            common::FakeComponent::installed(),
            Some(SelfHealingProbe::new("mysql-readiness", target.clone())),
        )
        .build()
        .expect("valid set");

    let (report, outcomes) = run_probes(&set, minutes(0), Duration::hours(1)).await;

    assert!(report.converged());
    assert_eq!(outcomes, vec![("mysql".to_string(), ProbeOutcome::Healthy)]);
    assert!(Arc::strong_count(&target) >= 2);
}

//! Platform reconciler
//!
//! A live Platform drives an install campaign (or an upgrade campaign once
//! `spec.version` moves past `status.version`) and evaluates every attached
//! self-healing probe. A deleted Platform drives the uninstall campaign and
//! keeps its finalizer until every component is gone.
//!
//! Each reconcile makes one pass; the returned [`Action`] schedules the next.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use conductor_common::crd::{Platform, PlatformPhase};
use conductor_common::events::{actions, reasons};
use conductor_common::{Error, Result, PLATFORM_FINALIZER};
use conductor_lifecycle::{
    run_install, run_probes, run_uninstall, run_upgrade, Campaign, CampaignKey, ComponentContext,
    LoggingStatusRecorder, OnceLog, Operation, ProbeOutcome, RunReport, StatusRecorder,
};

use crate::context::Context;
use crate::status_recorder::PlatformStatusRecorder;

/// Requeue after adding the finalizer, so the campaign sees the new object
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue after a failed reconcile
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Identity of the Platform being reconciled
struct Target {
    namespace: String,
    name: String,
    uid: String,
}

impl Target {
    fn of(platform: &Platform) -> Result<Self> {
        let name = platform.name_any();
        let namespace = platform.namespace().ok_or_else(|| {
            Error::validation_for_field(&name, "metadata.namespace", "Platform must be namespaced")
        })?;
        Ok(Self {
            namespace,
            name,
            uid: platform.uid().unwrap_or_default(),
        })
    }

    fn key(&self, operation: Operation) -> CampaignKey {
        CampaignKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            operation,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn has_finalizer(platform: &Platform) -> bool {
    platform
        .finalizers()
        .iter()
        .any(|f| f == PLATFORM_FINALIZER)
}

/// Install, or upgrade when the desired version moved past the installed one
pub fn campaign_operation(platform: &Platform) -> Operation {
    let installed = platform.status.as_ref().and_then(|s| s.version.as_deref());
    match (installed, platform.spec.version.as_deref()) {
        (Some(current), Some(desired)) if current != desired => Operation::Upgrade,
        _ => Operation::Install,
    }
}

fn status_recorder(ctx: &Context, target: &Target) -> Box<dyn StatusRecorder> {
    if ctx.config.dry_run {
        Box::new(LoggingStatusRecorder)
    } else {
        Box::new(PlatformStatusRecorder::new(
            ctx.platforms.clone(),
            &target.namespace,
            &target.name,
        ))
    }
}

/// Phase and message after one campaign pass
fn campaign_phase(operation: Operation, report: &RunReport) -> (PlatformPhase, String) {
    if report.converged() {
        let message = match operation {
            Operation::Uninstall => "All components uninstalled",
            _ => "All components ready",
        };
        return (PlatformPhase::Ready, message.to_string());
    }

    let phase = if report.failures.iter().any(|f| !f.retryable) {
        PlatformPhase::Failed
    } else {
        match operation {
            Operation::Install => PlatformPhase::Installing,
            Operation::Upgrade => PlatformPhase::Upgrading,
            Operation::Uninstall => PlatformPhase::Uninstalling,
        }
    };
    let message = if report.failures.is_empty() {
        format!("Waiting for components to {operation}")
    } else {
        let failing: Vec<&str> = report.failures.iter().map(|f| f.component.as_str()).collect();
        format!("{} failing: {}", operation, failing.join(", "))
    };
    (phase, message)
}

/// Patch phase, message and version, but only when something changed
///
/// Every status write triggers another watch event, so unchanged status is
/// never written.
async fn update_phase(
    ctx: &Context,
    platform: &Platform,
    target: &Target,
    phase: PlatformPhase,
    message: &str,
    version: Option<String>,
) -> Result<()> {
    let current = platform.status.clone().unwrap_or_default();
    let generation = platform.meta().generation;
    if current.phase == phase
        && current.message.as_deref() == Some(message)
        && current.version == version
        && current.observed_generation == generation
    {
        return Ok(());
    }

    debug!(%phase, message, "Updating platform phase");
    let patch = serde_json::json!({
        "phase": phase,
        "message": message,
        "version": version,
        "observedGeneration": generation,
    });
    ctx.platforms
        .patch_status(&target.namespace, &target.name, patch)
        .await
}

async fn publish(
    ctx: &Context,
    platform: &Platform,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&platform.object_ref(&()), type_, reason, action, Some(note))
        .await;
}

/// One Warning Event per failing component and state per campaign
async fn publish_failures(
    ctx: &Context,
    platform: &Platform,
    report: &RunReport,
    action: &str,
    once: &mut OnceLog,
) {
    for failure in &report.failures {
        if !once.first(format!("{}/{}/failed", failure.component, failure.state)) {
            continue;
        }
        publish(
            ctx,
            platform,
            EventType::Warning,
            reasons::COMPONENT_FAILED,
            action,
            format!("{} failed in {}: {}", failure.component, failure.state, failure.message),
        )
        .await;
    }
}

/// Reconcile a Platform
#[instrument(skip(platform, ctx), fields(platform = %platform.name_any()))]
pub async fn reconcile(platform: Arc<Platform>, ctx: Arc<Context>) -> Result<Action> {
    let target = Target::of(&platform)?;

    if platform.meta().deletion_timestamp.is_some() {
        return handle_deletion(&platform, &target, &ctx).await;
    }

    if !has_finalizer(&platform) {
        info!("Adding finalizer");
        ctx.platforms
            .add_finalizer(&target.namespace, &target.name, PLATFORM_FINALIZER)
            .await?;
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let operation = campaign_operation(&platform);
    let previous_phase = platform.status.as_ref().map(|s| s.phase).unwrap_or_default();
    let key = target.key(operation);
    let mut tracker = ctx.install_trackers.checkout(&key);

    let component_ctx = ComponentContext::new(target.to_string(), operation)
        .with_spec(platform.spec.clone())
        .with_dry_run(ctx.config.dry_run);
    let recorder = status_recorder(&ctx, &target);
    let campaign = Campaign {
        context: &component_ctx,
        components: &ctx.components,
        status: recorder.as_ref(),
        ownership: ctx.ownership.as_ref(),
    };

    let report = match operation {
        Operation::Upgrade => run_upgrade(&campaign, &mut tracker).await,
        _ => run_install(&campaign, &mut tracker).await,
    };
    let action = match operation {
        Operation::Upgrade => actions::UPGRADE,
        _ => actions::INSTALL,
    };
    publish_failures(&ctx, &platform, &report, action, tracker.once()).await;

    if report.converged() {
        ctx.install_trackers.finish(&key);
    } else {
        ctx.install_trackers.checkin(key, tracker);
    }

    let (probe_report, outcomes) =
        run_probes(&ctx.components, Utc::now(), ctx.config.probe_cooldown).await;
    for (component, outcome) in &outcomes {
        if *outcome == ProbeOutcome::Repaired {
            publish(
                &ctx,
                &platform,
                EventType::Warning,
                reasons::SELF_HEALED,
                actions::REPAIR,
                format!("Corrective action taken for {component}"),
            )
            .await;
        }
    }

    let (phase, message) = campaign_phase(operation, &report);
    let version = if report.converged() {
        platform.spec.version.clone()
    } else {
        platform.status.as_ref().and_then(|s| s.version.clone())
    };

    match (operation, phase) {
        (Operation::Upgrade, PlatformPhase::Ready) => {
            info!(version = ?version, "Upgrade complete");
            publish(&ctx, &platform, EventType::Normal, reasons::UPGRADE_COMPLETE, action, message.clone()).await;
        }
        (_, PlatformPhase::Ready) if previous_phase != PlatformPhase::Ready => {
            info!("Install complete");
            publish(&ctx, &platform, EventType::Normal, reasons::INSTALL_COMPLETE, action, message.clone()).await;
        }
        (Operation::Upgrade, PlatformPhase::Upgrading) if previous_phase != PlatformPhase::Upgrading => {
            info!(version = ?platform.spec.version, "Upgrade started");
            publish(&ctx, &platform, EventType::Normal, reasons::UPGRADE_STARTED, action, message.clone()).await;
        }
        (_, PlatformPhase::Installing) if previous_phase != PlatformPhase::Installing => {
            info!("Install started");
            publish(&ctx, &platform, EventType::Normal, reasons::INSTALL_STARTED, action, message.clone()).await;
        }
        _ => {}
    }

    update_phase(&ctx, &platform, &target, phase, &message, version).await?;

    if report.requeue_required || probe_report.requeue_required {
        Ok(Action::requeue(ctx.config.requeue))
    } else {
        Ok(Action::requeue(ctx.config.resync))
    }
}

/// Run the uninstall campaign and release the finalizer once it converges
async fn handle_deletion(platform: &Platform, target: &Target, ctx: &Context) -> Result<Action> {
    if !has_finalizer(platform) {
        debug!("No finalizer, allowing deletion");
        return Ok(Action::await_change());
    }

    // An install or upgrade in flight is abandoned
    ctx.install_trackers.finish(&target.key(Operation::Install));
    ctx.install_trackers.finish(&target.key(Operation::Upgrade));

    let previous_phase = platform.status.as_ref().map(|s| s.phase).unwrap_or_default();
    if previous_phase != PlatformPhase::Uninstalling && previous_phase != PlatformPhase::Failed {
        info!("Uninstall started");
        publish(
            ctx,
            platform,
            EventType::Normal,
            reasons::UNINSTALL_STARTED,
            actions::UNINSTALL,
            format!("Uninstalling {} components", ctx.components.len()),
        )
        .await;
    }

    let key = target.key(Operation::Uninstall);
    let mut tracker = ctx.uninstall_trackers.checkout(&key);

    let component_ctx = ComponentContext::new(target.to_string(), Operation::Uninstall)
        .with_spec(platform.spec.clone())
        .with_dry_run(ctx.config.dry_run);
    let recorder = status_recorder(ctx, target);
    let campaign = Campaign {
        context: &component_ctx,
        components: &ctx.components,
        status: recorder.as_ref(),
        ownership: ctx.ownership.as_ref(),
    };

    let report = run_uninstall(&campaign, &mut tracker, ctx.config.uninstall_order).await;
    publish_failures(ctx, platform, &report, actions::UNINSTALL, tracker.once()).await;

    if report.converged() {
        ctx.uninstall_trackers.finish(&key);
        info!("Uninstall complete, removing finalizer");
        publish(
            ctx,
            platform,
            EventType::Normal,
            reasons::UNINSTALL_COMPLETE,
            actions::UNINSTALL,
            "All components uninstalled".to_string(),
        )
        .await;
        ctx.platforms
            .remove_finalizer(&target.namespace, &target.name, PLATFORM_FINALIZER)
            .await?;
        return Ok(Action::await_change());
    }

    ctx.uninstall_trackers.checkin(key, tracker);
    let (phase, message) = campaign_phase(Operation::Uninstall, &report);
    let version = platform.status.as_ref().and_then(|s| s.version.clone());
    update_phase(ctx, platform, target, phase, &message, version).await?;
    Ok(Action::requeue(ctx.config.requeue))
}

/// Requeue after a failed reconcile
///
/// The classification only picks the log level; both kinds are retried.
pub fn error_policy(platform: Arc<Platform>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(platform = %platform.name_any(), error = %error, "Reconcile failed, will retry");
    } else {
        error!(platform = %platform.name_any(), error = %error, "Reconcile failed");
    }
    Action::requeue(ERROR_REQUEUE)
}

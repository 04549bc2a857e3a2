//! Controller runner - builds the Platform controller future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use conductor_common::crd::Platform;

use crate::context::Context;
use crate::controller::{error_policy, reconcile};

/// Watcher timeout (seconds), kept below the client read timeout (30s) so the
/// API server closes idle watches first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the Platform controller
///
/// The future completes when the process receives a shutdown signal.
pub fn build_platform_controller(
    client: Client,
    ctx: Arc<Context>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let platforms: Api<Platform> = Api::all(client);

    tracing::info!(components = ctx.components.len(), "- Platform controller");

    Box::pin(
        Controller::new(platforms, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("Platform")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

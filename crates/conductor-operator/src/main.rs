//! Conductor operator - component lifecycle orchestration for Platform resources

use std::sync::Arc;

use clap::Parser;
use kube::CustomResourceExt;

use conductor_common::crd::Platform;
use conductor_common::events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
use conductor_common::kube_utils::create_client;
use conductor_common::resources::KubeResourceStore;
use conductor_common::telemetry::{init_telemetry, TelemetryConfig};
use conductor_components::{Backends, Catalog, KubeManifestClient, KubePodClient};
use conductor_operator::controller_runner::build_platform_controller;
use conductor_operator::startup::{ensure_crds_installed, ensure_operator_network_policy};
use conductor_operator::{Cli, Context, KubePlatformClient};

const CONTROLLER_NAME: &str = "conductor-controller";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", serde_yaml::to_string(&Platform::crd())?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())?;
    let config = cli.controller_config();
    tracing::info!(
        catalog = %cli.components.display(),
        dry_run = config.dry_run,
        uninstall_order = %config.uninstall_order,
        "Starting conductor"
    );

    let client = create_client(cli.kubeconfig.as_deref()).await?;

    ensure_crds_installed(&client).await?;
    ensure_operator_network_policy(&client).await?;

    let catalog = Catalog::load(&cli.components)?;
    let backends = Backends {
        manifests: Arc::new(KubeManifestClient::new(client.clone())),
        store: Arc::new(KubeResourceStore::new(client.clone())),
        pods: Arc::new(KubePodClient::new(client.clone())),
    };
    let loaded = catalog.build(&backends)?;
    tracing::info!(components = ?loaded.components.names(), "Component catalog loaded");

    let events: Arc<dyn EventPublisher> = if config.dry_run {
        Arc::new(NoopEventPublisher)
    } else {
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME))
    };

    let ctx = Context::builder(
        Arc::new(KubePlatformClient::new(client.clone())),
        Arc::new(loaded.components),
    )
    .ownership(Arc::new(loaded.ownership))
    .events(events)
    .config(config)
    .build();

    build_platform_controller(client, Arc::new(ctx)).await;

    tracing::info!("Shutting down");
    Ok(())
}

//! Command line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use conductor_lifecycle::{UninstallOrder, DEFAULT_COOLDOWN};

// Largest value chrono::Duration::seconds accepts
const MAX_COOLDOWN_SECS: u64 = (i64::MAX / 1000) as u64;

/// Conductor - installs, upgrades and uninstalls a catalog of platform
/// components on behalf of Platform resources
#[derive(Parser, Debug, Clone)]
#[command(name = "conductor", version, about, long_about = None)]
pub struct Cli {
    /// Print the Platform CRD and exit
    #[arg(long)]
    pub crd: bool,

    /// Component catalog (YAML)
    #[arg(
        long,
        env = "CONDUCTOR_COMPONENTS",
        default_value = "/etc/conductor/catalog.yaml"
    )]
    pub components: PathBuf,

    /// Delay before the next pass while a campaign is still in progress
    #[arg(long, env = "CONDUCTOR_REQUEUE_SECS", default_value_t = 10)]
    pub requeue_secs: u64,

    /// Delay before re-checking a converged Platform
    #[arg(long, env = "CONDUCTOR_RESYNC_SECS", default_value_t = 60)]
    pub resync_secs: u64,

    /// Minimum time between two corrective actions of a self-healing probe
    #[arg(long, env = "CONDUCTOR_PROBE_COOLDOWN_SECS", default_value_t = DEFAULT_COOLDOWN.num_seconds() as u64)]
    pub probe_cooldown_secs: u64,

    /// Uninstall order: "reverse" (dependents first) or "registration"
    #[arg(long, env = "CONDUCTOR_UNINSTALL_ORDER", default_value = "reverse")]
    pub uninstall_order: UninstallOrder,

    /// Log what would be done without changing the cluster
    #[arg(long, env = "CONDUCTOR_DRY_RUN")]
    pub dry_run: bool,

    /// Kubeconfig path; in-cluster config when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

impl Cli {
    /// Reconcile settings derived from the flags
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            requeue: Duration::from_secs(self.requeue_secs),
            resync: Duration::from_secs(self.resync_secs),
            probe_cooldown: chrono::Duration::seconds(
                self.probe_cooldown_secs.min(MAX_COOLDOWN_SECS) as i64,
            ),
            uninstall_order: self.uninstall_order,
            dry_run: self.dry_run,
        }
    }
}

/// Settings the reconciler needs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Requeue delay while a campaign has work left
    pub requeue: Duration,
    /// Requeue delay once converged
    pub resync: Duration,
    /// Self-healing probe cooldown
    pub probe_cooldown: chrono::Duration,
    /// Uninstall iteration order
    pub uninstall_order: UninstallOrder,
    /// Skip cluster mutations in component hooks
    pub dry_run: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requeue: Duration::from_secs(10),
            resync: Duration::from_secs(60),
            probe_cooldown: DEFAULT_COOLDOWN,
            uninstall_order: UninstallOrder::default(),
            dry_run: false,
        }
    }
}

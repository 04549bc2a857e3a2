//! Startup tasks run before the controller starts

mod crds;
mod netpolicy;

pub use crds::ensure_crds_installed;
pub use netpolicy::{ensure_operator_network_policy, operator_network_policy};

//! Conductor operator
//!
//! Watches Platform resources and drives the component catalog through
//! install, upgrade and uninstall campaigns.

#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod context;
pub mod controller;
pub mod controller_runner;
pub mod startup;
pub mod status_recorder;

pub use client::{KubePlatformClient, PlatformClient};
pub use config::{Cli, ControllerConfig};
pub use context::{Context, ContextBuilder};
pub use status_recorder::PlatformStatusRecorder;

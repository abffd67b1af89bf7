//! fleetstat kernel - diagnostic monitor orchestration across a fleet
//!
//! - `config`: YAML fleet description, validated once
//! - `launcher`: boundary to the remote side (ssh by default)
//! - `monitor` / `wait_policy`: one target's monitors and which to block on
//! - `workers` / `orchestrator`: the host -> phase -> target task tree
//! - `report`: what the run observed

pub mod cli;
pub mod config;
pub mod errors;
pub mod launcher;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod report;
pub mod wait_policy;
pub mod workers;

pub use config::{FleetConfig, HostConfig, MonitorSpec, Phase, PhaseSpec};
pub use errors::{ConfigValidationError, FleetError, LaunchFailure, RemoteExitFailure};
pub use launcher::{LaunchRequest, RemoteCommandLauncher, RunningCommand, SshLauncher};
pub use models::{CommandExit, MonitorKind, Target};
pub use orchestrator::{Orchestrator, RunSettings};
pub use report::{MonitorStatus, Role, RunReport};
pub use wait_policy::WaitPolicy;

//! Command line of the `fleetstat` binary.

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::FleetConfig;
use crate::errors::ConfigValidationError;
use crate::launcher::RemoteCommandLauncher;
use crate::orchestrator::{Orchestrator, RunSettings, DEFAULT_CMD_PATH};
use crate::report::RunReport;
use crate::wait_policy::WaitPolicy;

/// Launches memory/network/CPU monitors across a fleet, phase by phase
#[derive(Parser, Debug, Clone)]
#[command(name = "fleetstat")]
#[command(version)]
#[command(about = "Fan out diagnostic monitors across remote hosts, phase by phase", long_about = None)]
pub struct Cli {
    /// Path to the YAML fleet config
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Path to the run log (default: <unix timestamp>.log)
    #[arg(short, long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Path to the monitoring commands on the remote hosts
    #[arg(short = 'p', long = "path", value_name = "CMD_PATH", default_value = DEFAULT_CMD_PATH)]
    pub cmd_path: String,

    /// Directory receiving the monitor logs
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Write the run report as JSON
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Wait for every monitor instead of only the longest ones
    #[arg(long)]
    pub wait_all: bool,

    /// Exit with status 2 when the run completed with failures
    #[arg(long)]
    pub strict: bool,
}

impl Cli {
    /// Problems detectable before reading the config; all are reported.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let shown = self.config.display();
        if !self.config.is_file() {
            errors.push(format!("{shown} does not exist"));
        }
        if !has_yaml_extension(&self.config) {
            errors.push(format!("{shown} does not appear to be a yaml file, must end in .yaml"));
        }
        if !self.output_dir.is_dir() {
            errors.push(format!("output directory {} does not exist", self.output_dir.display()));
        }
        errors
    }

    /// File checks and schema problems, reported together.
    pub async fn load_config(&self) -> Result<FleetConfig, ConfigValidationError> {
        let mut problems = self.validate();
        let loaded = if self.config.is_file() {
            FleetConfig::load(&self.config).await.map_err(|e| e.messages())
        } else {
            Err(Vec::new())
        };
        match loaded {
            Ok(config) if problems.is_empty() => {
                debug!("CONFIG: {config:?}");
                Ok(config)
            }
            Ok(_) => Err(ConfigValidationError::new(problems)),
            Err(messages) => {
                problems.extend(messages);
                Err(ConfigValidationError::new(problems))
            }
        }
    }

    /// Runs the whole fleet. Nothing is launched unless the config is accepted.
    pub async fn execute(&self, launcher: Arc<dyn RemoteCommandLauncher>) -> Result<RunReport, ConfigValidationError> {
        let config = self.load_config().await?;
        let orchestrator = Orchestrator::new(launcher, self.run_settings());
        Ok(orchestrator.run(config).await)
    }

    pub fn run_settings(&self) -> RunSettings {
        let policy = if self.wait_all { WaitPolicy::WaitAll } else { WaitPolicy::LongestExpected };
        RunSettings::default()
            .with_cmd_path(self.cmd_path.clone())
            .with_output_dir(self.output_dir.clone())
            .with_wait_policy(policy)
    }
}

fn has_yaml_extension(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["fleetstat", "-c", "fleet.yaml"]).unwrap();
        assert_eq!(cli.cmd_path, "~/bin/");
        assert!(!cli.debug);
        assert!(cli.log.is_none());
        assert_eq!(cli.run_settings().wait_policy, WaitPolicy::LongestExpected);
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["fleetstat", "-d"]).is_err());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "fleetstat", "-c", "f.yaml", "-d", "-p", "/opt/mon", "-l", "run.log", "--wait-all", "--strict",
        ])
        .unwrap();
        assert!(cli.debug && cli.strict);
        let settings = cli.run_settings();
        assert_eq!(settings.cmd_path, "/opt/mon/");
        assert_eq!(settings.wait_policy, WaitPolicy::WaitAll);
        assert_eq!(cli.log, Some(PathBuf::from("run.log")));
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let cli = Cli::try_parse_from(["fleetstat", "-c", "/nonexistent/fleet.json"]).unwrap();
        let errors = cli.validate();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("does not exist"));
        assert!(errors[1].contains("must end in .yaml"));
    }

    #[tokio::test]
    async fn test_load_config_merges_file_and_schema_problems() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.txt");
        std::fs::write(&path, "base_log_name: run1\n").unwrap();
        let cli = Cli::try_parse_from(["fleetstat", "-c", path.to_str().unwrap()]).unwrap();

        let err = cli.load_config().await.unwrap_err();
        assert!(err.messages.iter().any(|m| m.contains("must end in .yaml")));
        assert!(err.messages.iter().any(|m| m.contains("missing `hosts`")));
    }

    #[test]
    fn test_validate_accepts_existing_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.yml");
        std::fs::write(&path, "hosts: {}").unwrap();
        let cli = Cli::try_parse_from(["fleetstat", "-c", path.to_str().unwrap()]).unwrap();
        assert!(cli.validate().is_empty());
    }
}

//! Remote command launcher boundary
//!
//! The only place the orchestrator touches the outside world:
//! - `RemoteCommandLauncher` starts a command against a host without blocking
//! - `RunningCommand` is the live handle; waiting on it observes the exit,
//!   dropping it detaches the command
//! - `SshLauncher` is the production implementation (ssh + local log file)

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command as AsyncCommand};
use tracing::debug;

use crate::errors::LaunchFailure;
use crate::models::{CommandExit, MonitorKind, Target};

/// Everything needed to start one monitor command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub host: String,
    pub user: String,
    /// Fully rendered command line, run on the remote side.
    pub command: String,
    /// Local file receiving the command's stdout.
    pub log_path: PathBuf,
    /// Scheduling metadata; launchers are free to ignore it.
    pub phase_id: String,
    pub target: Target,
    pub kind: MonitorKind,
    pub expected_duration: Duration,
}

/// A command that has been started and may still be running.
pub trait RunningCommand: Send {
    /// OS process id of the local side, when there is one.
    fn id(&self) -> Option<u32>;

    /// Resolves once the command exits.
    fn wait(self: Box<Self>) -> BoxFuture<'static, std::io::Result<CommandExit>>;
}

/// Starts remote commands. `launch` must return as soon as the command runs;
/// it may do short blocking work (creating the log file, forking the local
/// client) and is called from runtime worker threads.
pub trait RemoteCommandLauncher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn RunningCommand>, LaunchFailure>;
}

/// Runs `ssh user@host "<command>" > log_path`.
#[derive(Debug, Clone)]
pub struct SshLauncher {
    program: String,
    extra_args: Vec<String>,
}

impl SshLauncher {
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
            extra_args: vec!["-o".to_string(), "BatchMode=yes".to_string()],
        }
    }

    /// Replaces the `ssh` binary, e.g. with a wrapper script.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn command_for(&self, request: &LaunchRequest) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.program);
        cmd.args(&self.extra_args)
            .arg(format!("{}@{}", request.user, request.host))
            .arg(&request.command);
        cmd
    }
}

impl Default for SshLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteCommandLauncher for SshLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn RunningCommand>, LaunchFailure> {
        // blocking open of one local file per monitor
        let log = File::create(&request.log_path).map_err(|source| LaunchFailure::LogFile {
            path: request.log_path.clone(),
            source,
        })?;

        debug!(
            "exec: {} {}@{} \"{}\" > {}",
            self.program,
            request.user,
            request.host,
            request.command,
            request.log_path.display()
        );

        // kill_on_drop stays false: detached monitors must outlive their handle
        let child = self
            .command_for(request)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| LaunchFailure::Spawn {
                program: self.program.clone(),
                host: request.host.clone(),
                source,
            })?;

        Ok(Box::new(SshCommand { child }))
    }
}

struct SshCommand {
    child: Child,
}

impl RunningCommand for SshCommand {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn wait(self: Box<Self>) -> BoxFuture<'static, std::io::Result<CommandExit>> {
        let mut child = self.child;
        async move { child.wait().await.map(CommandExit::from) }.boxed()
    }
}

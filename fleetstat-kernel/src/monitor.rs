//! Monitor tasks: one remote sampling command for one kind against one target
//!
//! A `MonitorTask` is planned (command rendered, log path chosen, expected
//! duration known) before anything runs, then launched into a
//! `ProcessHandle` that is either waited on or detached.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{HostConfig, MonitorSpec};
use crate::errors::{LaunchFailure, RemoteExitFailure};
use crate::launcher::{LaunchRequest, RemoteCommandLauncher, RunningCommand};
use crate::models::{CommandExit, MonitorKind, Target};
use crate::report::{MonitorReport, MonitorStatus, Role};

/// Where a planned monitor sits in the task tree.
#[derive(Debug, Clone, Copy)]
pub struct MonitorPlacement<'a> {
    pub host: &'a HostConfig,
    pub phase_id: &'a str,
    pub target: &'a Target,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTask {
    pub host: String,
    pub user: String,
    pub phase_id: String,
    pub kind: MonitorKind,
    pub target: Target,
    pub command: String,
    pub log_path: PathBuf,
    pub expected_duration: Duration,
}

impl MonitorTask {
    pub fn plan(
        placement: MonitorPlacement<'_>,
        kind: MonitorKind,
        spec: &MonitorSpec,
        cmd_path: &str,
        output_dir: &Path,
    ) -> Self {
        let MonitorPlacement { host, phase_id, target } = placement;
        let template = spec.template_for(kind, target);
        let command = render_command(template, target, spec, host.http_port, cmd_path);

        // several targets on one host would otherwise write the same file
        let target_label = (host.targets.len() > 1).then_some(target);
        let file = log_file_name(&host.base_log_name, &host.name, phase_id, target_label, kind);

        Self {
            host: host.name.clone(),
            user: host.user.clone(),
            phase_id: phase_id.to_string(),
            kind,
            target: target.clone(),
            command,
            log_path: output_dir.join(file),
            expected_duration: spec.expected_duration(),
        }
    }

    pub fn request(&self) -> LaunchRequest {
        LaunchRequest {
            host: self.host.clone(),
            user: self.user.clone(),
            command: self.command.clone(),
            log_path: self.log_path.clone(),
            phase_id: self.phase_id.clone(),
            target: self.target.clone(),
            kind: self.kind,
            expected_duration: self.expected_duration,
        }
    }

    /// Starts the command. A failure stays attached to this task only.
    pub fn launch(self, launcher: &dyn RemoteCommandLauncher) -> Launched {
        match launcher.launch(&self.request()) {
            Ok(running) => {
                debug!(
                    "{}: launched {} monitor for {} (pid {:?}, expected {}s)",
                    self.host,
                    self.kind,
                    self.target,
                    running.id(),
                    self.expected_duration.as_secs()
                );
                Launched::Running(ProcessHandle::new(self, running))
            }
            Err(error) => {
                warn!("{}: could not launch {} monitor for {}: {}", self.host, self.kind, self.target, error);
                Launched::Failed { task: self, error }
            }
        }
    }
}

/// Result of trying to start a monitor.
pub enum Launched {
    Running(ProcessHandle),
    Failed { task: MonitorTask, error: LaunchFailure },
}

impl Launched {
    pub fn task(&self) -> &MonitorTask {
        match self {
            Launched::Running(handle) => &handle.task,
            Launched::Failed { task, .. } => task,
        }
    }

    pub fn expected_duration(&self) -> Duration {
        self.task().expected_duration
    }

    /// Blocks until the command exits; a failed launch resolves immediately.
    pub async fn wait(self) -> MonitorReport {
        match self {
            Launched::Running(handle) => handle.wait().await,
            Launched::Failed { task, error } => MonitorReport::from_task(&task, Role::Primary, launch_failed(&error)),
        }
    }

    /// Releases the command without observing its exit.
    pub fn detach(self) -> MonitorReport {
        match self {
            Launched::Running(handle) => handle.detach(),
            Launched::Failed { task, error } => MonitorReport::from_task(&task, Role::Background, launch_failed(&error)),
        }
    }
}

/// Live remote command, owned by the task that launched it. Its final state
/// (completed or detached) is the status of the report it turns into.
pub struct ProcessHandle {
    task: MonitorTask,
    running: Box<dyn RunningCommand>,
}

impl ProcessHandle {
    fn new(task: MonitorTask, running: Box<dyn RunningCommand>) -> Self {
        Self { task, running }
    }

    pub async fn wait(self) -> MonitorReport {
        let Self { task, running } = self;
        let status = match running.wait().await {
            Ok(exit) => match exit_failure(exit) {
                None => MonitorStatus::Completed { exit_code: exit.code.unwrap_or_default() },
                Some(failure) => {
                    warn!("{}: {} monitor for {} failed: {}", task.host, task.kind, task.target, failure);
                    MonitorStatus::ExitFailed { exit_code: exit.code, error: failure.to_string() }
                }
            },
            Err(e) => {
                let failure = RemoteExitFailure::from(e);
                warn!("{}: {} monitor for {}: {}", task.host, task.kind, task.target, failure);
                MonitorStatus::ExitFailed { exit_code: None, error: failure.to_string() }
            }
        };
        MonitorReport::from_task(&task, Role::Primary, status)
    }

    /// The command keeps running; nobody will ever collect its exit status.
    pub fn detach(self) -> MonitorReport {
        let Self { task, running } = self;
        drop(running);
        MonitorReport::from_task(&task, Role::Background, MonitorStatus::Detached)
    }
}

fn exit_failure(exit: CommandExit) -> Option<RemoteExitFailure> {
    match exit.code {
        Some(0) => None,
        Some(code) => Some(RemoteExitFailure::NonZero(code)),
        None => Some(RemoteExitFailure::Signaled),
    }
}

fn launch_failed(error: &LaunchFailure) -> MonitorStatus {
    MonitorStatus::LaunchFailed { error: error.to_string() }
}

/// Substitutes `{cmd_path}`, `{pid}`, `{interval}`, `{amount}` and `{http_port}`.
pub fn render_command(
    template: &str,
    target: &Target,
    spec: &MonitorSpec,
    http_port: Option<u16>,
    cmd_path: &str,
) -> String {
    let port = http_port.map(|p| p.to_string()).unwrap_or_default();
    template
        .replace("{cmd_path}", cmd_path)
        .replace("{pid}", target.label())
        .replace("{interval}", &spec.interval_secs.to_string())
        .replace("{amount}", &spec.sample_count.to_string())
        .replace("{http_port}", &port)
        .trim()
        .to_string()
}

/// `{base}-{host}-phase{id}[-{target}]-{kind suffix}.log`
pub fn log_file_name(
    base_log_name: &str,
    host: &str,
    phase_id: &str,
    target: Option<&Target>,
    kind: MonitorKind,
) -> String {
    match target {
        Some(target) => format!(
            "{base_log_name}-{host}-phase{phase_id}-{}-{}.log",
            target.label(),
            kind.log_suffix()
        ),
        None => format!("{base_log_name}-{host}-phase{phase_id}-{}.log", kind.log_suffix()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Phase, PhaseSpec};

    fn host(targets: Vec<Target>) -> HostConfig {
        HostConfig {
            name: "web01".into(),
            user: "perf".into(),
            targets,
            phases: vec![Phase { id: "1".into(), spec: PhaseSpec::default() }],
            base_log_name: "run1".into(),
            http_port: Some(8080),
        }
    }

    fn plan(host: &HostConfig, target: &Target, kind: MonitorKind, spec: &MonitorSpec) -> MonitorTask {
        let placement = MonitorPlacement { host, phase_id: "1", target };
        MonitorTask::plan(placement, kind, spec, "~/bin/", Path::new("/tmp/logs"))
    }

    #[test]
    fn test_whole_host_and_process_command_shapes() {
        let h = host(vec![Target::WholeHost]);
        let spec = MonitorSpec::new(5, 12);

        let cpu_all = plan(&h, &Target::WholeHost, MonitorKind::Cpu, &spec);
        assert_eq!(cpu_all.command, "sar -u 5 12");

        let cpu_pid = plan(&h, &Target::Process("2211".into()), MonitorKind::Cpu, &spec);
        assert_eq!(cpu_pid.command, "sar -u -x 2211 5 12");

        let mem_all = plan(&h, &Target::WholeHost, MonitorKind::Memory, &spec);
        assert_eq!(mem_all.command, "sar -r 5 12");

        let mem_pid = plan(&h, &Target::Process("2211".into()), MonitorKind::Memory, &spec);
        assert_eq!(mem_pid.command, "~/bin/mem-stat.plx 2211 5 12");

        let net = plan(&h, &Target::WholeHost, MonitorKind::Network, &MonitorSpec::new(10, 6));
        assert_eq!(net.command, "~/bin/net-mon.plx 10 6 8080");
        assert_eq!(net.expected_duration, Duration::from_secs(60));
    }

    #[test]
    fn test_custom_template_overrides_default() {
        let h = host(vec![Target::WholeHost]);
        let spec = MonitorSpec::new(2, 3).with_command("{cmd_path}vmstat-loop {interval} {amount}");
        let task = plan(&h, &Target::WholeHost, MonitorKind::Memory, &spec);
        assert_eq!(task.command, "~/bin/vmstat-loop 2 3");
    }

    #[test]
    fn test_log_names_follow_report_convention() {
        let h = host(vec![Target::WholeHost]);
        let spec = MonitorSpec::new(1, 1);
        let net = plan(&h, &Target::WholeHost, MonitorKind::Network, &spec);
        assert_eq!(net.log_path, PathBuf::from("/tmp/logs/run1-web01-phase1-net_mon.log"));
        let mem = plan(&h, &Target::WholeHost, MonitorKind::Memory, &spec);
        assert_eq!(mem.log_path, PathBuf::from("/tmp/logs/run1-web01-phase1-mem_stats.log"));
    }

    #[test]
    fn test_log_names_include_target_when_host_has_several() {
        let h = host(vec![Target::WholeHost, Target::Process("77".into())]);
        let spec = MonitorSpec::new(1, 1);
        let a = plan(&h, &Target::WholeHost, MonitorKind::Cpu, &spec);
        let b = plan(&h, &Target::Process("77".into()), MonitorKind::Cpu, &spec);
        assert_eq!(a.log_path, PathBuf::from("/tmp/logs/run1-web01-phase1-ALL-cpu_stats.log"));
        assert_eq!(b.log_path, PathBuf::from("/tmp/logs/run1-web01-phase1-77-cpu_stats.log"));
    }

    struct Refusing;

    impl RemoteCommandLauncher for Refusing {
        fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn RunningCommand>, LaunchFailure> {
            Err(LaunchFailure::Refused { host: request.host.clone(), reason: "no route".into() })
        }
    }

    struct Exits(i32);

    impl RunningCommand for Exits {
        fn id(&self) -> Option<u32> {
            None
        }

        fn wait(self: Box<Self>) -> futures::future::BoxFuture<'static, std::io::Result<CommandExit>> {
            let code = self.0;
            Box::pin(async move { Ok(CommandExit::with_code(code)) })
        }
    }

    struct Immediate(i32);

    impl RemoteCommandLauncher for Immediate {
        fn launch(&self, _: &LaunchRequest) -> Result<Box<dyn RunningCommand>, LaunchFailure> {
            Ok(Box::new(Exits(self.0)))
        }
    }

    #[tokio::test]
    async fn test_handle_final_state_lands_in_report() {
        let h = host(vec![Target::WholeHost]);
        let spec = MonitorSpec::new(1, 2);

        let ok = plan(&h, &Target::WholeHost, MonitorKind::Cpu, &spec).launch(&Immediate(0)).wait().await;
        assert_eq!(ok.status, MonitorStatus::Completed { exit_code: 0 });

        let failed = plan(&h, &Target::WholeHost, MonitorKind::Cpu, &spec).launch(&Immediate(3)).wait().await;
        assert_eq!(failed.role, Role::Primary);
        assert!(matches!(failed.status, MonitorStatus::ExitFailed { exit_code: Some(3), .. }));

        let detached = plan(&h, &Target::WholeHost, MonitorKind::Memory, &spec).launch(&Immediate(3)).detach();
        assert_eq!(detached.role, Role::Background);
        assert_eq!(detached.status, MonitorStatus::Detached);
    }

    #[test]
    fn test_failed_launch_of_background_monitor_is_recorded() {
        let h = host(vec![Target::WholeHost]);
        let report = plan(&h, &Target::WholeHost, MonitorKind::Memory, &MonitorSpec::new(1, 1))
            .launch(&Refusing)
            .detach();
        assert_eq!(report.role, Role::Background);
        assert!(report.status.is_failure());
    }

    #[tokio::test]
    async fn test_failed_launch_resolves_immediately_when_waited() {
        let h = host(vec![Target::WholeHost]);
        let task = plan(&h, &Target::WholeHost, MonitorKind::Cpu, &MonitorSpec::new(1, 100));
        let launched = task.launch(&Refusing);
        assert_eq!(launched.expected_duration(), Duration::from_secs(100));

        let report = launched.wait().await;
        assert_eq!(report.role, Role::Primary);
        assert!(matches!(report.status, MonitorStatus::LaunchFailed { .. }));
    }
}

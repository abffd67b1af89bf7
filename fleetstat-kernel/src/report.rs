//! Run report: what every node of the task tree observed
//!
//! Built bottom-up as the barriers complete and returned by
//! `Orchestrator::run`. Serializable so the CLI can write it as JSON.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::models::{MonitorKind, Target};
use crate::monitor::MonitorTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Blocked on by its target worker.
    Primary,
    /// Launched and left to finish on its own.
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MonitorStatus {
    Completed { exit_code: i32 },
    /// Still running (or finished) unobserved.
    Detached,
    LaunchFailed { error: String },
    ExitFailed { exit_code: Option<i32>, error: String },
}

impl MonitorStatus {
    pub fn is_failure(&self) -> bool {
        self.failure_message().is_some()
    }

    pub fn failure_message(&self) -> Option<&str> {
        match self {
            MonitorStatus::LaunchFailed { error } | MonitorStatus::ExitFailed { error, .. } => Some(error),
            MonitorStatus::Completed { .. } | MonitorStatus::Detached => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub kind: MonitorKind,
    pub role: Role,
    pub expected_secs: u64,
    pub command: String,
    pub log_path: PathBuf,
    #[serde(flatten)]
    pub status: MonitorStatus,
}

impl MonitorReport {
    pub fn from_task(task: &MonitorTask, role: Role, status: MonitorStatus) -> Self {
        Self {
            kind: task.kind,
            role,
            expected_secs: task.expected_duration.as_secs(),
            command: task.command.clone(),
            log_path: task.log_path.clone(),
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: Target,
    /// Longest expected duration among the target's monitors.
    pub max_expected_secs: u64,
    pub elapsed_ms: u64,
    pub monitors: Vec<MonitorReport>,
    /// Set when the worker itself died before reporting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_error: Option<String>,
}

impl TargetReport {
    pub fn primary(&self) -> impl Iterator<Item = &MonitorReport> {
        self.monitors.iter().filter(|m| m.role == Role::Primary)
    }

    pub fn background(&self) -> impl Iterator<Item = &MonitorReport> {
        self.monitors.iter().filter(|m| m.role == Role::Background)
    }

    pub fn monitor(&self, kind: MonitorKind) -> Option<&MonitorReport> {
        self.monitors.iter().find(|m| m.kind == kind)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase_id: String,
    pub elapsed_ms: u64,
    pub targets: Vec<TargetReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub host: String,
    pub elapsed_ms: u64,
    pub phases: Vec<PhaseReport>,
    /// First failure seen on this host, in phase order.
    pub first_failure: Option<String>,
}

impl HostReport {
    pub fn is_success(&self) -> bool {
        self.first_failure.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub hosts: Vec<HostReport>,
}

/// One failed monitor, located in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord<'a> {
    pub host: &'a str,
    pub phase_id: &'a str,
    pub target: &'a Target,
    pub kind: MonitorKind,
    pub status: &'a MonitorStatus,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.hosts.iter().all(HostReport::is_success)
    }

    pub fn host(&self, name: &str) -> Option<&HostReport> {
        self.hosts.iter().find(|h| h.host == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = FailureRecord<'_>> {
        self.hosts.iter().flat_map(|host| {
            host.phases.iter().flat_map(move |phase| {
                phase.targets.iter().flat_map(move |target| {
                    target.monitors.iter().filter(|m| m.status.is_failure()).map(move |m| FailureRecord {
                        host: &host.host,
                        phase_id: &phase.phase_id,
                        target: &target.target,
                        kind: m.kind,
                        status: &m.status,
                    })
                })
            })
        })
    }

    /// Human-readable lines for the end-of-run summary.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "run {} finished in {:.1}s: {} host(s), {} failure(s)",
            self.run_id,
            self.elapsed_ms as f64 / 1000.0,
            self.hosts.len(),
            self.failures().count()
        )];
        for host in &self.hosts {
            let state = match &host.first_failure {
                None => "ok".to_string(),
                Some(f) => format!("FAILED ({f})"),
            };
            lines.push(format!("  {}: {} phase(s) in {:.1}s, {}", host.host, host.phases.len(), host.elapsed_ms as f64 / 1000.0, state));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(kind: MonitorKind, role: Role, status: MonitorStatus) -> MonitorReport {
        MonitorReport {
            kind,
            role,
            expected_secs: 10,
            command: "sar -u 1 10".into(),
            log_path: PathBuf::from("x.log"),
            status,
        }
    }

    fn report() -> RunReport {
        let failed = MonitorStatus::ExitFailed { exit_code: Some(255), error: "remote command exited with code 255".into() };
        RunReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed_ms: 10_000,
            hosts: vec![
                HostReport { host: "a".into(), elapsed_ms: 10_000, phases: vec![], first_failure: None },
                HostReport {
                    host: "b".into(),
                    elapsed_ms: 10_000,
                    phases: vec![PhaseReport {
                        phase_id: "1".into(),
                        elapsed_ms: 10_000,
                        targets: vec![TargetReport {
                            target: Target::WholeHost,
                            max_expected_secs: 10,
                            elapsed_ms: 10_000,
                            monitors: vec![
                                monitor(MonitorKind::Cpu, Role::Primary, failed.clone()),
                                monitor(MonitorKind::Memory, Role::Background, MonitorStatus::Detached),
                            ],
                            worker_error: None,
                        }],
                    }],
                    first_failure: Some("phase 1".into()),
                },
            ],
        }
    }

    #[test]
    fn test_failures_are_located() {
        let report = report();
        assert!(!report.is_success());
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].host, "b");
        assert_eq!(failures[0].kind, MonitorKind::Cpu);
    }

    #[test]
    fn test_report_serializes_status_inline() {
        let json = serde_json::to_value(report()).unwrap();
        let monitor = &json["hosts"][1]["phases"][0]["targets"][0]["monitors"][0];
        assert_eq!(monitor["status"], "exit_failed");
        assert_eq!(monitor["exit_code"], 255);
        assert_eq!(monitor["role"], "primary");
        assert_eq!(json["hosts"][1]["phases"][0]["targets"][0]["target"], "whole_host");
    }

    #[test]
    fn test_summary_mentions_failed_host() {
        let lines = report().summary_lines();
        assert!(lines[0].contains("1 failure(s)"));
        assert!(lines.iter().any(|l| l.contains("b: 1 phase(s)") && l.contains("FAILED")));
    }
}

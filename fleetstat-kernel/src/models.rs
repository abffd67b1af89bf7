use serde::Serialize;
use std::fmt;

/// Literal used in configs for "sample the whole host".
pub const WILDCARD_TARGET: &str = "ALL";

/// The three kinds of sampling a phase can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Memory,
    Network,
    Cpu,
}

impl MonitorKind {
    /// Accepts both the long names and the short keys of legacy configs.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "memory" | "mem" => Some(MonitorKind::Memory),
            "network" | "net" => Some(MonitorKind::Network),
            "cpu" => Some(MonitorKind::Cpu),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MonitorKind::Memory => "memory",
            MonitorKind::Network => "network",
            MonitorKind::Cpu => "cpu",
        }
    }

    /// Log name suffix expected by the report generators.
    pub fn log_suffix(self) -> &'static str {
        match self {
            MonitorKind::Memory => "mem_stats",
            MonitorKind::Network => "net_mon",
            MonitorKind::Cpu => "cpu_stats",
        }
    }

    /// Command used when the config does not override it.
    pub fn default_template(self, target: &Target) -> &'static str {
        match (self, target) {
            (MonitorKind::Memory, Target::WholeHost) => "sar -r {interval} {amount}",
            (MonitorKind::Memory, Target::Process(_)) => "{cmd_path}mem-stat.plx {pid} {interval} {amount}",
            (MonitorKind::Network, _) => "{cmd_path}net-mon.plx {interval} {amount} {http_port}",
            (MonitorKind::Cpu, Target::WholeHost) => "sar -u {interval} {amount}",
            (MonitorKind::Cpu, Target::Process(_)) => "sar -u -x {pid} {interval} {amount}",
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a monitor samples on its host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    WholeHost,
    Process(String),
}

impl Target {
    pub fn parse(raw: &str) -> Self {
        if raw == WILDCARD_TARGET {
            Target::WholeHost
        } else {
            Target::Process(raw.to_string())
        }
    }

    /// Value substituted for `{pid}` and used in log names.
    pub fn label(&self) -> &str {
        match self {
            Target::WholeHost => WILDCARD_TARGET,
            Target::Process(pid) => pid,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a remote command ended, as observed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl CommandExit {
    pub fn with_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for CommandExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self { code: status.code() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_keys_accept_legacy_aliases() {
        assert_eq!(MonitorKind::from_key("mem"), Some(MonitorKind::Memory));
        assert_eq!(MonitorKind::from_key("network"), Some(MonitorKind::Network));
        assert_eq!(MonitorKind::from_key("disk"), None);
    }

    #[test]
    fn test_wildcard_target() {
        assert_eq!(Target::parse("ALL"), Target::WholeHost);
        assert_eq!(Target::parse("4242"), Target::Process("4242".into()));
        assert_eq!(Target::WholeHost.label(), "ALL");
    }

    #[test]
    fn test_whole_host_templates_use_sar() {
        assert!(MonitorKind::Cpu.default_template(&Target::WholeHost).starts_with("sar -u "));
        assert!(MonitorKind::Memory
            .default_template(&Target::Process("1".into()))
            .contains("mem-stat.plx {pid}"));
    }
}

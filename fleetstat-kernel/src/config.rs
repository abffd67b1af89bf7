//! Configuration de la flotte : document YAML -> `FleetConfig` validée
//!
//! Le document est d'abord lu en `serde_yaml::Value` brute (qui conserve
//! l'ordre déclaré des hôtes et des phases), puis vérifié champ par champ.
//! Tous les problèmes sont collectés pour être affichés d'un coup.
//!
//! ```yaml
//! base_log_name: checkout-load
//! hosts:
//!   web01:
//!     user: perf
//!     targets: "ALL,2211"
//!     http_port: 8080
//!     phases:
//!       1:
//!         mem: { interval: 5, amount: 12 }
//!         net: { interval: 10, amount: 6 }
//!         cpu: { interval: 5, amount: 12 }
//! ```

use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::errors::{ConfigValidationError, FleetError};
use crate::models::{MonitorKind, Target, WILDCARD_TARGET};

/// Description validée, en lecture seule, de tous les hôtes à échantillonner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetConfig {
    /// Hôtes dans l'ordre déclaré ; noms uniques et sûrs pour un chemin
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub name: String,
    pub user: String,
    pub targets: Vec<Target>,
    /// L'ordre déclaré est l'ordre d'exécution
    pub phases: Vec<Phase>,
    pub base_log_name: String,
    pub http_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub id: String,
    pub spec: PhaseSpec,
}

/// Moniteurs déclarés pour une phase ; un type absent n'est pas lancé
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseSpec {
    pub monitors: BTreeMap<MonitorKind, MonitorSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSpec {
    pub interval_secs: u64,
    pub sample_count: u64,
    /// Remplace la commande par défaut du type de moniteur
    pub command: Option<String>,
}

impl MonitorSpec {
    pub fn new(interval_secs: u64, sample_count: u64) -> Self {
        Self { interval_secs, sample_count, command: None }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// `interval * amount` : indication d'ordonnancement, pas une mesure
    pub fn expected_duration(&self) -> Duration {
        Duration::from_secs(self.interval_secs.saturating_mul(self.sample_count))
    }

    pub fn template_for<'a>(&'a self, kind: MonitorKind, target: &Target) -> &'a str {
        self.command.as_deref().unwrap_or_else(|| kind.default_template(target))
    }
}

impl PhaseSpec {
    pub fn with(mut self, kind: MonitorKind, spec: MonitorSpec) -> Self {
        self.monitors.insert(kind, spec);
        self
    }
}

impl FleetConfig {
    /// Lit et valide un fichier de configuration
    pub async fn load(path: &Path) -> Result<Self, FleetError> {
        let text = fs::read_to_string(path).await.map_err(|source| FleetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, FleetError> {
        let doc: Value = serde_yaml::from_str(text)?;
        Ok(Self::from_value(&doc)?)
    }

    pub fn from_value(doc: &Value) -> Result<Self, ConfigValidationError> {
        let mut v = Validator::default();
        let config = v.fleet(doc);
        match config {
            Some(config) if v.messages.is_empty() => Ok(config),
            _ => Err(ConfigValidationError::new(v.messages)),
        }
    }

    pub fn host(&self, name: &str) -> Option<&HostConfig> {
        self.hosts.iter().find(|h| h.name == name)
    }
}

#[derive(Default)]
struct Validator {
    messages: Vec<String>,
}

impl Validator {
    fn push(&mut self, msg: impl Into<String>) {
        self.messages.push(msg.into());
    }

    fn fleet(&mut self, doc: &Value) -> Option<FleetConfig> {
        let Some(root) = doc.as_mapping() else {
            self.push("configuration must be a mapping with a `hosts` key");
            return None;
        };

        let mut default_base = None;
        let mut hosts_value = None;
        for (key, value) in root {
            match key_name(key).as_deref() {
                Some("base_log_name") => default_base = self.log_name(value, "base_log_name"),
                Some("hosts") => hosts_value = Some(value),
                Some(other) => self.push(format!("unknown top-level key `{other}`")),
                None => self.push("top-level keys must be strings"),
            }
        }

        let Some(hosts_value) = hosts_value else {
            self.push("missing `hosts`");
            return None;
        };
        let Some(hosts_map) = hosts_value.as_mapping() else {
            self.push("`hosts` must be a mapping of host name to host settings");
            return None;
        };
        if hosts_map.is_empty() {
            self.push("`hosts` declares no host");
            return None;
        }

        let mut seen = HashSet::new();
        let mut hosts = Vec::with_capacity(hosts_map.len());
        for (key, value) in hosts_map {
            let Some(name) = key_name(key).filter(|n| !n.is_empty()) else {
                self.push("host names must be non-empty strings");
                continue;
            };
            if !is_safe_token(&name) {
                self.push(format!("host `{name}`: name may only contain letters, digits, `.`, `-` and `_`"));
                continue;
            }
            if !seen.insert(name.clone()) {
                self.push(format!("host `{name}` declared twice"));
                continue;
            }
            if let Some(host) = self.host(&name, value, default_base.as_deref()) {
                hosts.push(host);
            }
        }
        Some(FleetConfig { hosts })
    }

    fn host(&mut self, name: &str, value: &Value, default_base: Option<&str>) -> Option<HostConfig> {
        let before = self.messages.len();
        let Some(map) = value.as_mapping() else {
            self.push(format!("host `{name}`: settings must be a mapping"));
            return None;
        };

        let mut user = None;
        let mut targets = None;
        let mut phases = None;
        let mut base_log_name = default_base.map(str::to_string);
        let mut http_port = None;

        for (key, value) in map {
            match key_name(key).as_deref() {
                Some("user") => match value.as_str().filter(|s| !s.trim().is_empty()) {
                    Some(u) => user = Some(u.trim().to_string()),
                    None => self.push(format!("host `{name}`: `user` must be a non-empty string")),
                },
                Some("targets") | Some("pids") => targets = self.targets(name, value),
                Some("phases") => phases = Some(value),
                Some("base_log_name") => {
                    if let Some(b) = self.log_name(value, &format!("host `{name}`: base_log_name")) {
                        base_log_name = Some(b);
                    }
                }
                Some("http_port") => match as_u64(value).and_then(|p| u16::try_from(p).ok()) {
                    Some(p) if p > 0 => http_port = Some(p),
                    _ => self.push(format!("host `{name}`: `http_port` must be a port number")),
                },
                Some(other) => self.push(format!("host `{name}`: unknown key `{other}`")),
                None => self.push(format!("host `{name}`: keys must be strings")),
            }
        }

        if user.is_none() && !has_any_key(map, &["user"]) {
            self.push(format!("host `{name}`: missing `user`"));
        }
        if targets.is_none() && !has_any_key(map, &["targets", "pids"]) {
            self.push(format!("host `{name}`: missing `targets`"));
        }
        if base_log_name.is_none() {
            self.push(format!("host `{name}`: no `base_log_name` (set it globally or per host)"));
        }
        let phases = match phases {
            Some(value) => self.phases(name, value, http_port),
            None => {
                self.push(format!("host `{name}`: missing `phases`"));
                None
            }
        };

        if self.messages.len() > before {
            return None;
        }
        Some(HostConfig {
            name: name.to_string(),
            user: user?,
            targets: targets?,
            phases: phases?,
            base_log_name: base_log_name?,
            http_port,
        })
    }

    fn targets(&mut self, host: &str, value: &Value) -> Option<Vec<Target>> {
        let raw: Vec<String> = match value {
            Value::String(s) => s.split(',').map(|t| t.trim().to_string()).collect(),
            Value::Number(n) => vec![n.to_string()],
            Value::Sequence(items) => items.iter().filter_map(scalar_string).map(|t| t.trim().to_string()).collect(),
            _ => {
                self.push(format!("host `{host}`: `targets` must be a comma-separated string or a list"));
                return None;
            }
        };

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for entry in raw.into_iter().filter(|t| !t.is_empty()) {
            if entry != WILDCARD_TARGET && !is_safe_token(&entry) {
                self.push(format!("host `{host}`: target `{entry}` is not a process id or name"));
                continue;
            }
            if !seen.insert(entry.clone()) {
                self.push(format!("host `{host}`: target `{entry}` listed twice"));
                continue;
            }
            targets.push(Target::parse(&entry));
        }
        if targets.is_empty() {
            self.push(format!("host `{host}`: `targets` is empty"));
            return None;
        }
        Some(targets)
    }

    fn phases(&mut self, host: &str, value: &Value, http_port: Option<u16>) -> Option<Vec<Phase>> {
        let Some(map) = value.as_mapping() else {
            self.push(format!("host `{host}`: `phases` must be a mapping of phase id to monitors"));
            return None;
        };
        if map.is_empty() {
            self.push(format!("host `{host}`: `phases` declares no phase"));
            return None;
        }

        let mut seen = HashSet::new();
        let mut phases = Vec::with_capacity(map.len());
        for (key, value) in map {
            let Some(id) = key_name(key).filter(|id| !id.is_empty()) else {
                self.push(format!("host `{host}`: phase ids must be strings or numbers"));
                continue;
            };
            if !is_safe_token(&id) {
                self.push(format!("host `{host}`: phase id `{id}` may only contain letters, digits, `.`, `-` and `_`"));
                continue;
            }
            if !seen.insert(id.clone()) {
                self.push(format!("host `{host}`: phase `{id}` declared twice"));
                continue;
            }
            if let Some(spec) = self.phase_spec(host, &id, value, http_port) {
                phases.push(Phase { id, spec });
            }
        }
        Some(phases)
    }

    fn phase_spec(&mut self, host: &str, phase: &str, value: &Value, http_port: Option<u16>) -> Option<PhaseSpec> {
        let ctx = format!("host `{host}` phase `{phase}`");
        let Some(map) = value.as_mapping() else {
            self.push(format!("{ctx}: must map monitor kinds to settings"));
            return None;
        };

        if map.is_empty() {
            self.push(format!("{ctx}: declares no monitor"));
            return None;
        }

        let mut spec = PhaseSpec::default();
        for (key, value) in map {
            let name = key_name(key).unwrap_or_default();
            let Some(kind) = MonitorKind::from_key(&name) else {
                self.push(format!("{ctx}: unknown monitor kind `{name}` (expected memory, network or cpu)"));
                continue;
            };
            if spec.monitors.contains_key(&kind) {
                self.push(format!("{ctx}: {kind} monitor declared twice"));
                continue;
            }
            if let Some(monitor) = self.monitor(&format!("{ctx} {kind}"), value) {
                let needs_port = [Target::WholeHost, Target::Process(String::new())]
                    .iter()
                    .any(|t| monitor.template_for(kind, t).contains("{http_port}"));
                if needs_port && http_port.is_none() {
                    self.push(format!("{ctx}: {kind} command needs `http_port` on the host"));
                }
                spec.monitors.insert(kind, monitor);
            }
        }
        Some(spec)
    }

    fn monitor(&mut self, ctx: &str, value: &Value) -> Option<MonitorSpec> {
        let Some(map) = value.as_mapping() else {
            self.push(format!("{ctx}: must be a mapping with `interval` and `amount`"));
            return None;
        };
        let before = self.messages.len();
        let mut interval = None;
        let mut amount = None;
        let mut command = None;
        for (key, value) in map {
            match key_name(key).as_deref() {
                Some("interval") => interval = self.positive(ctx, "interval", value),
                Some("amount") => amount = self.positive(ctx, "amount", value),
                Some("command") => match value.as_str().filter(|c| !c.trim().is_empty()) {
                    Some(c) => command = Some(c.to_string()),
                    None => self.push(format!("{ctx}: `command` must be a non-empty string")),
                },
                Some(other) => self.push(format!("{ctx}: unknown key `{other}`")),
                None => self.push(format!("{ctx}: keys must be strings")),
            }
        }
        if !has_any_key(map, &["interval"]) {
            self.push(format!("{ctx}: missing `interval`"));
        }
        if !has_any_key(map, &["amount"]) {
            self.push(format!("{ctx}: missing `amount`"));
        }
        if self.messages.len() > before {
            return None;
        }
        Some(MonitorSpec { interval_secs: interval?, sample_count: amount?, command })
    }

    fn positive(&mut self, ctx: &str, field: &str, value: &Value) -> Option<u64> {
        match as_u64(value) {
            Some(n) if n > 0 => Some(n),
            _ => {
                self.push(format!("{ctx}: `{field}` must be a positive integer"));
                None
            }
        }
    }

    fn log_name(&mut self, value: &Value, ctx: &str) -> Option<String> {
        match value.as_str().map(str::trim) {
            Some(name) if is_safe_token(name) => Some(name.to_string()),
            _ => {
                self.push(format!("{ctx} must be a non-empty file name prefix"));
                None
            }
        }
    }
}

/// Clés de mapping en chaînes ; les anciennes configs utilisent des clés `:symbole`
fn key_name(key: &Value) -> Option<String> {
    scalar_string(key).map(|k| k.trim_start_matches(':').to_string())
}

/// Noms repris dans les fichiers de log et les lignes de commande distantes
fn is_safe_token(value: &str) -> bool {
    !value.is_empty()
        && !value.chars().all(|c| c == '.')
        && !value.starts_with('-')
        && value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn has_any_key(map: &Mapping, keys: &[&str]) -> bool {
    map.keys().filter_map(key_name).any(|k| keys.contains(&k.as_str()))
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
base_log_name: run1
hosts:
  web01:
    user: perf
    targets: "ALL, 2211"
    http_port: 8080
    phases:
      1:
        mem: { interval: 1, amount: 5 }
        net: { interval: 1, amount: 10 }
        cpu: { interval: 1, amount: 3 }
      2:
        cpu: { interval: 2, amount: 2 }
  db01:
    user: oracle
    pids: [ALL]
    base_log_name: dbrun
    phases:
      warmup:
        memory: { interval: "5", amount: 2 }
"#;

    #[test]
    fn test_parse_sample_preserves_order() {
        let config = FleetConfig::from_yaml_str(SAMPLE).unwrap();
        let names: Vec<_> = config.hosts.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["web01", "db01"]);

        let web = config.host("web01").unwrap();
        assert_eq!(web.targets, vec![Target::WholeHost, Target::Process("2211".into())]);
        let phase_ids: Vec<_> = web.phases.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(phase_ids, vec!["1", "2"]);
        assert_eq!(web.base_log_name, "run1");

        let net = &web.phases[0].spec.monitors[&MonitorKind::Network];
        assert_eq!(net.expected_duration(), Duration::from_secs(10));

        let db = config.host("db01").unwrap();
        assert_eq!(db.base_log_name, "dbrun");
        assert_eq!(db.phases[0].spec.monitors[&MonitorKind::Memory].interval_secs, 5);
    }

    #[test]
    fn test_missing_hosts_is_rejected() {
        let err = FleetConfig::from_yaml_str("base_log_name: run1\n").unwrap_err();
        assert!(err.messages().iter().any(|m| m.contains("missing `hosts`")));
    }

    #[test]
    fn test_all_problems_are_accumulated() {
        let yaml = r#"
base_log_name: run1
hosts:
  web01:
    targets: ""
    phases:
      1:
        cpu: { interval: 0, amount: 3 }
        disk: { interval: 1, amount: 1 }
"#;
        let messages = FleetConfig::from_yaml_str(yaml).unwrap_err().messages();
        assert!(messages.iter().any(|m| m.contains("missing `user`")));
        assert!(messages.iter().any(|m| m.contains("`targets` is empty")));
        assert!(messages.iter().any(|m| m.contains("`interval` must be a positive integer")));
        assert!(messages.iter().any(|m| m.contains("unknown monitor kind `disk`")));
    }

    #[test]
    fn test_network_without_http_port_is_rejected() {
        let yaml = r#"
base_log_name: run1
hosts:
  web01:
    user: perf
    targets: ALL
    phases:
      1:
        net: { interval: 1, amount: 2 }
"#;
        let messages = FleetConfig::from_yaml_str(yaml).unwrap_err().messages();
        assert!(messages.iter().any(|m| m.contains("needs `http_port`")));
    }

    #[test]
    fn test_custom_network_command_does_not_need_port() {
        let yaml = r#"
base_log_name: run1
hosts:
  web01:
    user: perf
    targets: ALL
    phases:
      1:
        net: { interval: 1, amount: 2, command: "netstat-loop {interval} {amount}" }
"#;
        let config = FleetConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.hosts[0].http_port, None);
    }

    #[test]
    fn test_legacy_symbol_keys() {
        let yaml = r#"
:base_log_name: legacy
:hosts:
  app01:
    :user: ops
    :pids: "1001,1002"
    :phases:
      1:
        :cpu:
          :interval: 1
          :amount: 4
"#;
        let config = FleetConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.hosts[0].targets.len(), 2);
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        let yaml = r#"
base_log_name: run1
hosts:
  web01:
    user: perf
    targets: "12,12"
    phases:
      1:
        cpu: { interval: 1, amount: 1 }
"#;
        let messages = FleetConfig::from_yaml_str(yaml).unwrap_err().messages();
        assert!(messages.iter().any(|m| m.contains("listed twice")));
    }

    #[test]
    fn test_host_declared_twice_after_normalization() {
        let yaml = r#"
base_log_name: run1
hosts:
  web01:
    user: perf
    targets: ALL
    phases:
      1:
        cpu: { interval: 1, amount: 1 }
  ":web01":
    user: perf
    targets: ALL
    phases:
      1:
        cpu: { interval: 1, amount: 1 }
"#;
        let messages = FleetConfig::from_yaml_str(yaml).unwrap_err().messages();
        assert!(messages.iter().any(|m| m.contains("host `web01` declared twice")));
    }

    #[test]
    fn test_phase_declared_twice_after_normalization() {
        let yaml = r#"
base_log_name: run1
hosts:
  web01:
    user: perf
    targets: ALL
    phases:
      1:
        cpu: { interval: 1, amount: 1 }
      "1":
        mem: { interval: 1, amount: 1 }
"#;
        let messages = FleetConfig::from_yaml_str(yaml).unwrap_err().messages();
        assert!(messages.iter().any(|m| m.contains("phase `1` declared twice")));
    }

    #[test]
    fn test_unsafe_names_are_rejected() {
        let yaml = r#"
base_log_name: run1
hosts:
  "../etc":
    user: perf
    targets: ALL
    phases:
      1:
        cpu: { interval: 1, amount: 1 }
  web01:
    user: perf
    targets: "1; rm -rf ~"
    phases:
      "a/b":
        cpu: { interval: 1, amount: 1 }
      "..":
        cpu: { interval: 1, amount: 1 }
"#;
        let messages = FleetConfig::from_yaml_str(yaml).unwrap_err().messages();
        assert!(messages.iter().any(|m| m.contains("host `../etc`: name may only contain")));
        assert!(messages.iter().any(|m| m.contains("target `1; rm -rf ~` is not a process id")));
        assert!(messages.iter().any(|m| m.contains("phase id `a/b`")));
        assert!(messages.iter().any(|m| m.contains("phase id `..`")));
    }

    #[test]
    fn test_safe_tokens() {
        assert!(is_safe_token("web01.example.com"));
        assert!(is_safe_token("warm_up-2"));
        assert!(!is_safe_token(".."));
        assert!(!is_safe_token("-oProxyCommand"));
        assert!(!is_safe_token("a b"));
        assert!(!is_safe_token("$(id)"));
    }

    #[test]
    fn test_invalid_yaml_reports_parse_error() {
        let err = FleetConfig::from_yaml_str("hosts: [unclosed").unwrap_err();
        assert!(matches!(err, FleetError::Yaml(_)));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.yaml");
        tokio::fs::write(&path, SAMPLE).await.unwrap();
        let config = FleetConfig::load(&path).await.unwrap();
        assert_eq!(config.hosts.len(), 2);

        let missing = FleetConfig::load(&dir.path().join("nope.yaml")).await.unwrap_err();
        assert!(matches!(missing, FleetError::Io { .. }));
    }
}

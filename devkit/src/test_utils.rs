/*!
Test Harness pour scénarios d'orchestration

Facilite l'écriture de tests avec :
- Builders de `FleetConfig` sans passer par le YAML
- Exécution de l'orchestrateur contre un `MockLauncher`
- Assertions de chronologie (ordre des phases, concurrence, durées)
*/

use anyhow::{bail, Result};
use fleetstat_kernel::{
    FleetConfig, HostConfig, MonitorKind, MonitorSpec, Orchestrator, Phase, PhaseSpec, RunReport, RunSettings, Target,
    WaitPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::launcher_stub::{CommandRecord, MockLauncher};

/// Écart toléré entre durée simulée et durée attendue
pub const TIMING_TOLERANCE: Duration = Duration::from_millis(50);

pub fn assert_about(actual: Duration, expected: Duration) {
    let drift = if actual > expected { actual - expected } else { expected - actual };
    assert!(
        drift <= TIMING_TOLERANCE,
        "expected about {expected:?}, got {actual:?}"
    );
}

/// Construit une phase à partir de triplets `(kind, interval, amount)`
pub fn phase(monitors: &[(MonitorKind, u64, u64)]) -> PhaseSpec {
    monitors
        .iter()
        .fold(PhaseSpec::default(), |spec, &(kind, interval, amount)| {
            spec.with(kind, MonitorSpec::new(interval, amount))
        })
}

pub struct HostBuilder {
    host: HostConfig,
}

impl HostBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            host: HostConfig {
                name: name.to_string(),
                user: "perf".to_string(),
                targets: vec![Target::WholeHost],
                phases: Vec::new(),
                base_log_name: "test".to_string(),
                http_port: Some(8080),
            },
        }
    }

    pub fn user(mut self, user: &str) -> Self {
        self.host.user = user.to_string();
        self
    }

    /// `ALL` pour l'hôte entier, tout le reste comme identifiant de processus
    pub fn targets(mut self, targets: &[&str]) -> Self {
        self.host.targets = targets.iter().map(|t| Target::parse(t)).collect();
        self
    }

    pub fn phase(mut self, id: &str, spec: PhaseSpec) -> Self {
        self.host.phases.push(Phase { id: id.to_string(), spec });
        self
    }

    pub fn build(self) -> HostConfig {
        self.host
    }
}

#[derive(Default)]
pub struct FleetBuilder {
    hosts: Vec<HostConfig>,
}

impl FleetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: HostBuilder) -> Self {
        self.hosts.push(host.build());
        self
    }

    pub fn build(self) -> FleetConfig {
        FleetConfig { hosts: self.hosts }
    }
}

/// Harness de test : orchestrateur branché sur un `MockLauncher` partagé
pub struct TestHarness {
    pub launcher: MockLauncher,
    pub settings: RunSettings,
}

impl TestHarness {
    pub fn new() -> Self {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();

        Self {
            launcher: MockLauncher::new(),
            settings: RunSettings::default().with_output_dir("logs"),
        }
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.settings = self.settings.with_wait_policy(policy);
        self
    }

    /// Exécute la flotte, renvoie le rapport et la durée simulée
    pub async fn run(&self, config: FleetConfig) -> (RunReport, Duration) {
        let orchestrator = Orchestrator::new(Arc::new(self.launcher.clone()), self.settings.clone());
        let start = Instant::now();
        let report = orchestrator.run(config).await;
        (report, start.elapsed())
    }

    pub fn records(&self, host: &str, phase_id: &str) -> Vec<CommandRecord> {
        self.launcher
            .records_for(host)
            .into_iter()
            .filter(|r| r.request.phase_id == phase_id)
            .collect()
    }

    /// Premier lancement et dernière fin observée d'une phase sur un hôte
    pub fn phase_window(&self, host: &str, phase_id: &str) -> Option<(Instant, Instant)> {
        let records = self.records(host, phase_id);
        let first_launch = records.iter().map(|r| r.launched_at).min()?;
        let last_primary_exit = records
            .iter()
            .filter(|r| r.observed)
            .filter_map(|r| r.finished_at)
            .max()
            .unwrap_or(first_launch);
        Some((first_launch, last_primary_exit))
    }

    /// La dernière fin primaire de la phase i précède le premier lancement de i+1
    pub fn assert_phases_do_not_overlap(&self, host: &str, phase_ids: &[&str]) -> Result<()> {
        for pair in phase_ids.windows(2) {
            let (Some((_, end)), Some((next_start, _))) =
                (self.phase_window(host, pair[0]), self.phase_window(host, pair[1]))
            else {
                bail!("{host}: no launches recorded for phase {} or {}", pair[0], pair[1]);
            };
            if end > next_start {
                bail!("{host}: phase {} still running when phase {} launched", pair[0], pair[1]);
            }
        }
        Ok(())
    }

    /// Vrai si les deux hôtes ont eu des moniteurs actifs en même temps
    pub fn hosts_overlapped(&self, a: &str, b: &str) -> bool {
        let span = |host: &str| {
            let records = self.launcher.records_for(host);
            let start = records.iter().map(|r| r.launched_at).min()?;
            let end = records.iter().filter_map(|r| r.finished_at).max()?;
            Some((start, end))
        };
        match (span(a), span(b)) {
            (Some((sa, ea)), Some((sb, eb))) => sa < eb && sb < ea,
            _ => false,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

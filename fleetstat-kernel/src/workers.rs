//! Arbre de tâches sous l'orchestrateur
//!
//! - `HostWorker` : un hôte, phases strictement l'une après l'autre
//! - `PhaseWorker` : une phase, toutes les cibles en parallèle, puis une barrière
//! - `TargetWorker` : une cible, tous les moniteurs en parallèle, puis attente
//!   de l'ensemble primaire choisi par la politique d'attente
//!
//! Chaque worker possède ses enfants et remonte un rapport à son parent.
//! La configuration est partagée en lecture seule via un `Arc`.

use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{FleetConfig, HostConfig, Phase};
use crate::launcher::RemoteCommandLauncher;
use crate::monitor::{Launched, MonitorPlacement, MonitorTask};
use crate::orchestrator::RunSettings;
use crate::report::{HostReport, MonitorReport, PhaseReport, TargetReport};

/// Ce dont chaque worker a besoin en plus de sa part de configuration
#[derive(Clone)]
pub struct WorkerContext {
    pub launcher: Arc<dyn RemoteCommandLauncher>,
    pub settings: Arc<RunSettings>,
}

pub struct HostWorker {
    config: Arc<FleetConfig>,
    host: usize,
    ctx: WorkerContext,
}

impl HostWorker {
    pub fn new(config: Arc<FleetConfig>, host: usize, ctx: WorkerContext) -> Self {
        Self { config, host, ctx }
    }

    fn host(&self) -> &HostConfig {
        &self.config.hosts[self.host]
    }

    /// Exécute les phases dans l'ordre déclaré. Une phase en échec est notée
    /// et la suivante démarre quand même une fois sa barrière atteinte.
    pub async fn run(self) -> HostReport {
        let clock = Instant::now();
        let name = self.host().name.clone();
        let mut phases = Vec::with_capacity(self.host().phases.len());
        let mut first_failure = None;

        for phase in 0..self.host().phases.len() {
            let worker = PhaseWorker::new(self.config.clone(), self.host, phase, self.ctx.clone());
            let report = worker.run().await;
            if first_failure.is_none() {
                first_failure = describe_failure(&report);
            }
            phases.push(report);
        }

        match &first_failure {
            None => info!("{name}: all {} phase(s) done", phases.len()),
            Some(failure) => warn!("{name}: phases done with errors, first: {failure}"),
        }
        HostReport { host: name, elapsed_ms: elapsed_ms(clock), phases, first_failure }
    }
}

pub struct PhaseWorker {
    config: Arc<FleetConfig>,
    host: usize,
    phase: usize,
    ctx: WorkerContext,
}

impl PhaseWorker {
    pub fn new(config: Arc<FleetConfig>, host: usize, phase: usize, ctx: WorkerContext) -> Self {
        Self { config, host, phase, ctx }
    }

    /// Se termine quand toutes les cibles ont terminé, quel que soit leur résultat
    pub async fn run(self) -> PhaseReport {
        let clock = Instant::now();
        let host = &self.config.hosts[self.host];
        let phase_id = host.phases[self.phase].id.clone();
        debug!("{}: starting phase {} with {} target(s)", host.name, phase_id, host.targets.len());

        let handles: Vec<_> = (0..host.targets.len())
            .map(|target| {
                let worker = TargetWorker::new(self.config.clone(), self.host, self.phase, target, self.ctx.clone());
                tokio::spawn(worker.run())
            })
            .collect();

        let targets = join_all(handles)
            .await
            .into_iter()
            .zip(&host.targets)
            .map(|(joined, target)| {
                joined.unwrap_or_else(|e| {
                    error!("{}: target worker for {} in phase {} died: {}", host.name, target, phase_id, e);
                    TargetReport {
                        target: target.clone(),
                        max_expected_secs: 0,
                        elapsed_ms: 0,
                        monitors: Vec::new(),
                        worker_error: Some(join_error(&e)),
                    }
                })
            })
            .collect();

        PhaseReport { phase_id, elapsed_ms: elapsed_ms(clock), targets }
    }
}

pub struct TargetWorker {
    config: Arc<FleetConfig>,
    host: usize,
    phase: usize,
    target: usize,
    ctx: WorkerContext,
}

impl TargetWorker {
    pub fn new(config: Arc<FleetConfig>, host: usize, phase: usize, target: usize, ctx: WorkerContext) -> Self {
        Self { config, host, phase, target, ctx }
    }

    /// Lance tous les moniteurs déclarés, détache ceux d'arrière-plan et
    /// rend la main quand tous les primaires sont terminés.
    pub async fn run(self) -> TargetReport {
        let clock = Instant::now();
        let host = &self.config.hosts[self.host];
        let Phase { id: phase_id, spec } = &host.phases[self.phase];
        let target = &host.targets[self.target];
        let settings = &self.ctx.settings;

        info!("Launching phase {phase_id} monitors on {} for {target}... ({})", host.name, chrono::Local::now());

        let placement = MonitorPlacement { host, phase_id, target };
        let launched: Vec<Launched> = spec
            .monitors
            .iter()
            .map(|(kind, monitor)| {
                MonitorTask::plan(placement, *kind, monitor, &settings.cmd_path, &settings.output_dir)
                    .launch(self.ctx.launcher.as_ref())
            })
            .collect();

        let split = settings.wait_policy.partition(launched, Launched::expected_duration);

        let mut monitors: Vec<MonitorReport> = split
            .background
            .into_iter()
            .map(|launched| {
                debug!("{}: detaching {} monitor for {}", host.name, launched.task().kind, target);
                launched.detach()
            })
            .collect();

        info!("Waiting for monitors for phase {phase_id} on {} to stop...", host.name);
        let waits = split.primary.into_iter().map(|launched| {
            debug!("{}: waiting for {} monitor for {}", host.name, launched.task().kind, target);
            launched.wait()
        });
        monitors.extend(join_all(waits).await);
        monitors.sort_by_key(|m| m.kind);
        info!("...Monitors for phase {phase_id} on {} stopped ({})", host.name, chrono::Local::now());

        TargetReport {
            target: target.clone(),
            max_expected_secs: split.max_duration.map(|d| d.as_secs()).unwrap_or_default(),
            elapsed_ms: elapsed_ms(clock),
            monitors,
            worker_error: None,
        }
    }
}

/// Premier problème d'une phase, formulé pour le résumé de l'hôte
fn describe_failure(phase: &PhaseReport) -> Option<String> {
    phase.targets.iter().find_map(|target| {
        if let Some(err) = &target.worker_error {
            return Some(format!("phase {} target {}: {}", phase.phase_id, target.target, err));
        }
        target.monitors.iter().find_map(|m| {
            m.status
                .failure_message()
                .map(|msg| format!("phase {} {} monitor for {}: {}", phase.phase_id, m.kind, target.target, msg))
        })
    })
}

pub(crate) fn join_error(e: &JoinError) -> String {
    if e.is_panic() {
        "worker panicked".to_string()
    } else {
        format!("worker cancelled: {e}")
    }
}

pub(crate) fn elapsed_ms(clock: Instant) -> u64 {
    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX)
}

//! Sommet de l'arbre de tâches : un `HostWorker` par hôte, tous en parallèle

use chrono::Utc;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::FleetConfig;
use crate::launcher::RemoteCommandLauncher;
use crate::report::{HostReport, RunReport};
use crate::wait_policy::WaitPolicy;
use crate::workers::{elapsed_ms, join_error, HostWorker, WorkerContext};

/// Emplacement par défaut des scripts de monitoring sur les hôtes distants
pub const DEFAULT_CMD_PATH: &str = "~/bin/";

/// Options du run qui ne font pas partie de la description de la flotte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Préfixe de `{cmd_path}`, toujours terminé par `/`
    pub cmd_path: String,
    /// Dossier recevant les logs des moniteurs
    pub output_dir: PathBuf,
    pub wait_policy: WaitPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            cmd_path: DEFAULT_CMD_PATH.to_string(),
            output_dir: PathBuf::from("."),
            wait_policy: WaitPolicy::default(),
        }
    }
}

impl RunSettings {
    pub fn with_cmd_path(mut self, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.is_empty() && !path.ends_with('/') {
            path.push('/');
        }
        self.cmd_path = path;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }
}

pub struct Orchestrator {
    ctx: WorkerContext,
}

impl Orchestrator {
    pub fn new(launcher: Arc<dyn RemoteCommandLauncher>, settings: RunSettings) -> Self {
        Self {
            ctx: WorkerContext { launcher, settings: Arc::new(settings) },
        }
    }

    /// Démarre tous les hôtes puis les attend tous. Un hôte en échec
    /// n'arrête jamais les autres.
    pub async fn run(&self, config: FleetConfig) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let config = Arc::new(config);

        info!("run {run_id}: starting monitors on {} host(s)", config.hosts.len());

        let handles: Vec<_> = config
            .hosts
            .iter()
            .enumerate()
            .map(|(index, host)| {
                info!("Working with host [{}]", host.name);
                let worker = HostWorker::new(config.clone(), index, self.ctx.clone());
                tokio::spawn(worker.run())
            })
            .collect();

        let hosts = join_all(handles)
            .await
            .into_iter()
            .zip(&config.hosts)
            .map(|(joined, host)| {
                joined.unwrap_or_else(|e| {
                    error!("{}: host worker died: {}", host.name, e);
                    HostReport {
                        host: host.name.clone(),
                        elapsed_ms: 0,
                        phases: Vec::new(),
                        first_failure: Some(join_error(&e)),
                    }
                })
            })
            .collect();

        RunReport { run_id, started_at, elapsed_ms: elapsed_ms(clock), hosts }
    }
}

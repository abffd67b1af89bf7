/*!
Lanceur distant simulé pour tester l'orchestration sans ssh

Chaque commande lancée "tourne" sur l'horloge tokio pendant sa durée
attendue (ou scriptée) et chaque lancement/fin est enregistré, pour vérifier
ordre et timing sous `#[tokio::test(start_paused = true)]`.
Les commandes détachées continuent après l'abandon de leur handle et sont
marquées terminées à échéance, sans que personne ne l'observe.
*/

use fleetstat_kernel::{
    CommandExit, LaunchFailure, LaunchRequest, MonitorKind, RemoteCommandLauncher, RunningCommand, Target,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Comportement d'une commande scriptée
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Tourne pendant la durée attendue, sort avec 0
    Normal,
    /// Tourne pendant une durée fixe, sort avec 0
    RunFor(Duration),
    /// Tourne pendant la durée attendue puis sort avec ce code
    ExitWith(i32),
    /// `launch` échoue directement
    FailLaunch(String),
}

#[derive(Debug, Clone)]
struct Rule {
    host: Option<String>,
    target: Option<Target>,
    kind: Option<MonitorKind>,
    script: Script,
}

impl Rule {
    fn matches(&self, request: &LaunchRequest) -> bool {
        self.host.as_deref().map_or(true, |h| h == request.host)
            && self.target.as_ref().map_or(true, |t| *t == request.target)
            && self.kind.map_or(true, |k| k == request.kind)
    }
}

/// Une commande telle que vue par le mock
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub id: u32,
    pub request: LaunchRequest,
    pub launched_at: Instant,
    /// Fin de la commande, observée ou non
    pub finished_at: Option<Instant>,
    /// `true` si le contrôleur a attendu la fin
    pub observed: bool,
}

#[derive(Default)]
struct State {
    rules: Vec<Rule>,
    records: Vec<CommandRecord>,
    refused: Vec<LaunchRequest>,
}

/// Lanceur simulé ; les clones partagent les mêmes enregistrements
#[derive(Clone, Default)]
pub struct MockLauncher {
    state: Arc<Mutex<State>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripte les commandes par hôte et/ou type ; la dernière règle gagne
    pub fn script(&self, host: Option<&str>, kind: Option<MonitorKind>, script: Script) -> &Self {
        self.state.lock().rules.push(Rule {
            host: host.map(str::to_string),
            target: None,
            kind,
            script,
        });
        self
    }

    /// Scripte toutes les commandes d'une cible d'un hôte ; `ALL` = hôte entier
    pub fn script_target(&self, host: &str, target: &str, script: Script) -> &Self {
        self.state.lock().rules.push(Rule {
            host: Some(host.to_string()),
            target: Some(Target::parse(target)),
            kind: None,
            script,
        });
        self
    }

    pub fn fail_launch(&self, host: &str, kind: MonitorKind) -> &Self {
        self.script(Some(host), Some(kind), Script::FailLaunch("connection refused".into()))
    }

    pub fn exit_with(&self, host: &str, kind: MonitorKind, code: i32) -> &Self {
        self.script(Some(host), Some(kind), Script::ExitWith(code))
    }

    pub fn run_for(&self, host: &str, kind: MonitorKind, duration: Duration) -> &Self {
        self.script(Some(host), Some(kind), Script::RunFor(duration))
    }

    /// Toutes les commandes lancées, dans l'ordre de lancement
    pub fn records(&self) -> Vec<CommandRecord> {
        self.state.lock().records.clone()
    }

    pub fn records_for(&self, host: &str) -> Vec<CommandRecord> {
        self.records().into_iter().filter(|r| r.request.host == host).collect()
    }

    /// Lancements refusés par un script `FailLaunch`
    pub fn refused(&self) -> Vec<LaunchRequest> {
        self.state.lock().refused.clone()
    }

    pub fn launch_count(&self) -> usize {
        let state = self.state.lock();
        state.records.len() + state.refused.len()
    }

    fn script_for(&self, request: &LaunchRequest) -> Script {
        let state = self.state.lock();
        state
            .rules
            .iter()
            .rev()
            .find(|rule| rule.matches(request))
            .map(|rule| rule.script.clone())
            .unwrap_or(Script::Normal)
    }

    fn finish(&self, id: u32, observed: bool) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.iter_mut().find(|r| r.id == id) {
            record.finished_at = Some(Instant::now());
            record.observed = observed;
        }
    }
}

impl RemoteCommandLauncher for MockLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn RunningCommand>, LaunchFailure> {
        let (duration, code) = match self.script_for(request) {
            Script::Normal => (request.expected_duration, 0),
            Script::RunFor(duration) => (duration, 0),
            Script::ExitWith(code) => (request.expected_duration, code),
            Script::FailLaunch(reason) => {
                debug!("mock: refusing {} monitor on {}", request.kind, request.host);
                self.state.lock().refused.push(request.clone());
                return Err(LaunchFailure::Refused { host: request.host.clone(), reason });
            }
        };

        let launched_at = Instant::now();
        let id = {
            let mut state = self.state.lock();
            let id = state.records.len() as u32 + 1;
            state.records.push(CommandRecord {
                id,
                request: request.clone(),
                launched_at,
                finished_at: None,
                observed: false,
            });
            id
        };
        debug!("mock: #{id} {} on {} for {:?}", request.command, request.host, duration);

        Ok(Box::new(MockCommand {
            id,
            launcher: self.clone(),
            deadline: launched_at + duration,
            code,
            pending: true,
        }))
    }
}

struct MockCommand {
    id: u32,
    launcher: MockLauncher,
    deadline: Instant,
    code: i32,
    /// Remis à false dès qu'on attend ; un drop encore en attente = détaché
    pending: bool,
}

impl RunningCommand for MockCommand {
    fn id(&self) -> Option<u32> {
        Some(self.id)
    }

    fn wait(mut self: Box<Self>) -> BoxFuture<'static, std::io::Result<CommandExit>> {
        self.pending = false;
        let (id, deadline, code, launcher) = (self.id, self.deadline, self.code, self.launcher.clone());
        async move {
            tokio::time::sleep_until(deadline).await;
            launcher.finish(id, true);
            Ok(CommandExit::with_code(code))
        }
        .boxed()
    }
}

impl Drop for MockCommand {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        let (id, deadline, launcher) = (self.id, self.deadline, self.launcher.clone());
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep_until(deadline).await;
                launcher.finish(id, false);
            });
        }
    }
}

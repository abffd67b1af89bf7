//! Taxonomie des erreurs de l'orchestrateur
//!
//! - `ConfigValidationError` : fatale, levée avant toute création de l'arbre de tâches
//! - `LaunchFailure` : une commande distante n'a pas pu démarrer
//! - `RemoteExitFailure` : une commande primaire s'est terminée en échec
//!
//! Les échecs d'exécution n'annulent jamais les tâches sœurs : ils sont
//! rattachés au `RunReport` une fois les barrières franchies.

use std::path::PathBuf;

/// Tous les problèmes trouvés en validant un document de configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render(.messages))]
pub struct ConfigValidationError {
    pub messages: Vec<String>,
}

impl ConfigValidationError {
    pub fn new(messages: Vec<String>) -> Self {
        Self { messages }
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self { messages: vec![message.into()] }
    }
}

fn render(messages: &[String]) -> String {
    let mut text = format!("invalid configuration ({} problem(s))", messages.len());
    for msg in messages {
        text.push_str("\n  - ");
        text.push_str(msg);
    }
    text
}

/// Le lanceur n'a pas pu démarrer une commande distante
#[derive(Debug, thiserror::Error)]
pub enum LaunchFailure {
    #[error("cannot create log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn `{program}` for {host}: {source}")]
    Spawn {
        program: String,
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("launcher refused command on {host}: {reason}")]
    Refused { host: String, reason: String },
}

/// Une commande distante primaire s'est mal terminée
#[derive(Debug, thiserror::Error)]
pub enum RemoteExitFailure {
    #[error("remote command exited with code {0}")]
    NonZero(i32),
    #[error("remote command terminated by signal")]
    Signaled,
    #[error("failed to wait for remote command: {0}")]
    Wait(#[from] std::io::Error),
}

/// Erreurs possibles entre la lecture du fichier et la configuration validée
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
}

impl FleetError {
    /// Aplatit l'erreur en messages affichés avant de quitter
    pub fn messages(&self) -> Vec<String> {
        match self {
            FleetError::Validation(e) => e.messages.clone(),
            other => vec![other.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_message() {
        let err = ConfigValidationError::new(vec!["a".into(), "b".into()]);
        let text = err.to_string();
        assert!(text.contains("2 problem(s)"));
        assert!(text.contains("- a"));
        assert!(text.contains("- b"));
    }

    #[test]
    fn test_fleet_error_messages_flatten() {
        let err = FleetError::from(ConfigValidationError::single("missing `hosts`"));
        assert_eq!(err.messages(), vec!["missing `hosts`".to_string()]);
    }
}

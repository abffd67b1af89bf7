/**
 * FLEETSTAT - Point d'entrée de l'orchestrateur de moniteurs
 *
 * RÔLE : Lecture de la ligne de commande, validation de la config de flotte,
 * ouverture du log de run, lancement des phases de chaque hôte via ssh et
 * affichage du résumé final.
 *
 * CODES DE SORTIE : 0 une fois tous les hôtes terminés (les échecs sont
 * seulement rapportés), 1 si la config est rejetée, 2 avec `--strict` en cas d'échecs.
 */

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use fleetstat_kernel::cli::Cli;
use fleetstat_kernel::logging;
use fleetstat_kernel::{RunReport, SshLauncher};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_path = cli.log.clone().unwrap_or_else(logging::default_log_path);
    logging::init(&log_path, cli.debug)?;
    debug!("OPTIONS: {cli:?}");

    let report = match cli.execute(Arc::new(SshLauncher::new())).await {
        Ok(report) => report,
        Err(e) => return Ok(reject(&e.messages)),
    };

    for line in report.summary_lines() {
        info!("{line}");
    }
    for failure in report.failures() {
        warn!(
            "{} phase {} {} monitor for {}: {}",
            failure.host,
            failure.phase_id,
            failure.kind,
            failure.target,
            failure.status.failure_message().unwrap_or_default()
        );
    }

    if let Some(path) = &cli.report {
        write_report(&report, path).await?;
        info!("report written to {}", path.display());
    }

    if cli.strict && !report.is_success() {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn reject(problems: &[String]) -> ExitCode {
    for msg in problems {
        error!("{msg}");
    }
    error!("configuration rejected, nothing was launched");
    ExitCode::from(1)
}

async fn write_report(report: &RunReport, path: &std::path::Path) -> Result<()> {
    let payload = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

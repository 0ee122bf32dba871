//! ForceSync - command line entry point.
//!
//! Runs force-plate syncs, cohort recomputation and reference seeding against
//! the local database. Results print as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use forcesync::metrics::composite::CompositeKind;
use forcesync::storage::config::{get_config_path, init_config, load_config, load_config_from};
use forcesync::storage::{AthleteStore, PercentileStore, ReferenceSeed};
use forcesync::{
    AppConfig, AthleteProfile, Cohort, Database, Discipline, ForceDecksClient, ServiceWriter,
    SyncError, SyncOrchestrator,
};

/// Force-plate sync and percentile scoring.
#[derive(Debug, Parser)]
#[command(name = "forcesync", version, about = "Force-plate test sync and percentile scoring")]
struct Cli {
    /// Configuration file (defaults to the platform data directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Sync one athlete's tests from the provider
    Sync { athlete_id: Uuid },
    /// Sync every linked athlete
    SyncAll,
    /// Reclassify an athlete and recompute percentiles and composites
    Recompute { athlete_id: Uuid, cohort: Cohort },
    /// Import reference samples from a JSON file
    Seed { file: PathBuf },
    /// Manage athletes
    #[command(subcommand)]
    Athlete(AthleteCommand),
    /// Show an athlete's percentile history
    History {
        athlete_id: Uuid,
        /// Only this discipline (CMJ, SJ, HJ, PPU, IMTP)
        #[arg(long, value_parser = parse_discipline)]
        discipline: Option<Discipline>,
        /// Only the authoritative row per test and metric
        #[arg(long)]
        latest: bool,
        /// Force profile composite per test date instead of raw rows
        #[arg(long, conflicts_with_all = ["discipline", "latest"])]
        by_date: bool,
    },
}

#[derive(Debug, Subcommand)]
enum AthleteCommand {
    /// Add an athlete
    Add {
        name: String,
        cohort: Cohort,
        /// Provider profile id
        #[arg(long)]
        external_id: Option<String>,
        /// Provider sync id to resolve on first sync
        #[arg(long)]
        pending_link: Option<String>,
    },
    /// Show an athlete record and composite history
    Show { athlete_id: Uuid },
}

fn parse_discipline(code: &str) -> Result<Discipline, String> {
    Discipline::from_code(code).ok_or_else(|| format!("unknown discipline: {}", code))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_writer(config: &AppConfig) -> Result<ServiceWriter> {
    let path = config.database_path();
    let db = Database::open(&path)
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(ServiceWriter::elevate(Arc::new(Mutex::new(db))))
}

fn orchestrator(config: &AppConfig, writer: ServiceWriter) -> Result<SyncOrchestrator<ForceDecksClient>> {
    let client = ForceDecksClient::new(&config.provider).context("creating provider client")?;
    Ok(SyncOrchestrator::new(client, writer, config.sync.clone()))
}

fn run_error(e: SyncError) -> anyhow::Error {
    let status = e.status();
    anyhow::Error::new(e).context(format!("sync failed with status {}", status.code()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Command::Init { force } = cli.command {
        let path = cli.config.unwrap_or_else(get_config_path);
        let written = init_config(&path, force).context("writing configuration")?;
        return print_json(&serde_json::json!({ "path": path, "written": written }));
    }

    let config = match cli.config.as_deref() {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("loading configuration")?;

    tracing::debug!("ForceSync v{} using {}", config.version, config.database_path().display());

    let writer = open_writer(&config)?;

    match cli.command {
        Command::Sync { athlete_id } => {
            let result = orchestrator(&config, writer)?
                .sync_athlete(athlete_id)
                .await
                .map_err(run_error)?;
            print_json(&result)
        }
        Command::SyncAll => {
            let summary = orchestrator(&config, writer)?
                .sync_all_linked()
                .await
                .map_err(run_error)?;
            print_json(&summary)
        }
        Command::Recompute { athlete_id, cohort } => {
            let summary = orchestrator(&config, writer)?
                .recompute_all(athlete_id, cohort)
                .map_err(run_error)?;
            print_json(&summary)
        }
        Command::Seed { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let seeds: Vec<ReferenceSeed> =
                serde_json::from_str(&content).context("parsing reference seeds")?;

            let written = writer.with_transaction(|tx| {
                let store = PercentileStore::new(tx);
                let mut written = 0;
                for seed in &seeds {
                    written += store.insert_reference_seed(seed)?;
                }
                Ok(written)
            })?;

            tracing::info!("Imported {} reference samples from {} populations", written, seeds.len());
            print_json(&serde_json::json!({ "populations": seeds.len(), "samples": written }))
        }
        Command::Athlete(AthleteCommand::Add {
            name,
            cohort,
            external_id,
            pending_link,
        }) => {
            let mut athlete = AthleteProfile::new(name, Some(cohort));
            if let Some(external_id) = external_id {
                athlete = athlete.with_external_id(external_id);
            }
            if let Some(pending) = pending_link {
                athlete = athlete.with_pending_link(pending);
            }

            writer.with_conn(|conn| AthleteStore::new(conn).insert_athlete(&athlete))?;
            print_json(&athlete)
        }
        Command::Athlete(AthleteCommand::Show { athlete_id }) => {
            let (athlete, rolling, profile) = writer.with_conn(|conn| {
                let athlete = AthleteStore::new(conn).get_athlete(&athlete_id)?;
                let store = PercentileStore::new(conn);
                Ok((
                    athlete,
                    store.composite_history(&athlete_id, CompositeKind::Rolling)?,
                    store.composite_history(&athlete_id, CompositeKind::ForceProfile)?,
                ))
            })?;
            let athlete = athlete.with_context(|| format!("athlete {} not found", athlete_id))?;

            print_json(&serde_json::json!({
                "athlete": athlete,
                "rolling_history": rolling,
                "force_profile_history": profile,
            }))
        }
        Command::Init { .. } => Ok(()),
        Command::History {
            athlete_id,
            by_date: true,
            ..
        } => {
            let dated = writer
                .with_conn(|conn| PercentileStore::new(conn).force_profiles_by_date(&athlete_id))?;
            print_json(&dated)
        }
        Command::History {
            athlete_id,
            discipline,
            latest,
            ..
        } => {
            let entries = writer.with_conn(|conn| {
                let store = PercentileStore::new(conn);
                if latest {
                    let entries = store.latest_entries(&athlete_id)?;
                    Ok(entries
                        .into_iter()
                        .filter(|e| discipline.map_or(true, |d| e.discipline == d))
                        .collect())
                } else {
                    store.history_for(&athlete_id, discipline)
                }
            })?;
            print_json(&entries)
        }
    }
}

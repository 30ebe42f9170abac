//! f501-harvest - Football 501 statistics harvester
//!
//! Harvests per-entity season statistics from the configured source into the
//! local store and computes the answer sets of the quiz questions.
//! Results are printed as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use f501_common::config::{
    database_path, load_toml_config, resolve_config_path, DataFolderResolver, TomlConfig,
};
use f501_harvest::db::{self, answers, questions};
use f501_harvest::source::HttpSourceAdapter;
use f501_harvest::{question_import, HarvestOptions, Harvester};

/// Command-line arguments for f501-harvest
#[derive(Parser, Debug)]
#[command(name = "f501-harvest")]
#[command(about = "Football 501 statistics harvester")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "F501_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Folder holding the database
    #[arg(short, long, env = "F501_DATA_FOLDER", global = true)]
    data_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest season statistics for local entity ids
    Harvest {
        /// Local entity ids
        ids: Vec<i64>,

        /// Harvest every known entity
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        /// Fetch even if harvested within the freshness window
        #[arg(long)]
        force: bool,
    },

    /// Retry entities whose latest attempt failed
    Retry,

    /// Seed entities from one league season roster
    Seed { league: String, season: String },

    /// Re-seed every configured league for the current season
    UpdateSeason,

    /// Recompute one question's answer set
    Compute { question_id: Uuid },

    /// Recompute every active question
    ComputeAll,

    /// Manage question definitions
    #[command(subcommand)]
    Questions(QuestionsCommand),

    /// Show the answers of one question
    Answers { question_id: Uuid },

    /// Store contents, scrape status and recent jobs
    Status,

    /// Entities whose latest attempt failed
    Failed {
        /// List entities still pending instead
        #[arg(long)]
        pending: bool,
    },

    /// Show one entity with its season records
    Entity {
        /// Local entity id
        id: Option<i64>,

        /// Look up by source id instead
        #[arg(long, conflicts_with = "id")]
        external: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum QuestionsCommand {
    /// Create or update questions from a TOML file
    Import { file: PathBuf },

    /// List stored questions
    List {
        /// Include inactive questions
        #[arg(long)]
        all: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(args: &Args) -> Result<TomlConfig> {
    let mut config = match resolve_config_path(args.config.as_deref()) {
        Some(path) => load_toml_config(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TomlConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Cancel the token on Ctrl+C; workers finish in-flight entities and stop
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received Ctrl+C, finishing in-flight entities");
                child.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "f501-harvest {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let data_folder = DataFolderResolver::new(args.data_folder.clone()).resolve(&config);
    std::fs::create_dir_all(&data_folder)
        .with_context(|| format!("Failed to create data folder {}", data_folder.display()))?;
    let db_path = database_path(&data_folder);
    info!("Database: {}", db_path.display());

    let pool = db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let source =
        HttpSourceAdapter::new(&config.source).context("Failed to build source client")?;
    let harvester = Harvester::new(pool.clone(), &config, Arc::new(source))?;
    harvester.cleanup_stale().await?;

    match args.command {
        Command::Harvest { ids, all, force } => {
            let options = HarvestOptions {
                force,
                cancel: cancel_on_ctrl_c(),
            };
            let report = if all {
                harvester.harvest_all(&options).await?
            } else {
                anyhow::ensure!(!ids.is_empty(), "Give entity ids or --all");
                harvester.harvest_entities(&ids, &options).await?
            };
            print_json(&report)?;
        }
        Command::Retry => {
            let options = HarvestOptions {
                force: true,
                cancel: cancel_on_ctrl_c(),
            };
            print_json(&harvester.retry_failed(&options).await?)?;
        }
        Command::Seed { league, season } => {
            print_json(&harvester.seed_league_roster(&league, &season).await?)?;
        }
        Command::UpdateSeason => {
            print_json(&harvester.harvest_current_season().await?)?;
        }
        Command::Compute { question_id } => {
            print_json(&harvester.compute_answers(question_id).await?)?;
        }
        Command::ComputeAll => {
            print_json(&harvester.compute_all_active_answers().await?)?;
        }
        Command::Questions(QuestionsCommand::Import { file }) => {
            print_json(&question_import::import_file(&pool, &file).await?)?;
        }
        Command::Questions(QuestionsCommand::List { all }) => {
            print_json(&questions::list_questions(&pool, !all).await?)?;
        }
        Command::Answers { question_id } => {
            print_json(&answers::list_answers(&pool, question_id).await?)?;
        }
        Command::Status => {
            print_json(&harvester.status_summary().await?)?;
        }
        Command::Failed { pending } => {
            if pending {
                print_json(&harvester.pending_entities().await?)?;
            } else {
                print_json(&harvester.failed_entities().await?)?;
            }
        }
        Command::Entity { id, external } => {
            let entity = match (id, external) {
                (Some(id), _) => harvester.get_entity(id).await?,
                (None, Some(external_id)) => harvester
                    .store()
                    .find_entity(&external_id)
                    .await?
                    .with_context(|| format!("No entity with source id {}", external_id))?,
                (None, None) => anyhow::bail!("Give an entity id or --external"),
            };
            print_json(&entity)?;
        }
    }

    Ok(())
}

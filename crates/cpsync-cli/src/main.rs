use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cpsync_core::{Problem, ProblemKey, ProblemQuery, RunStats};
use cpsync_storage::ProblemStore;
use cpsync_sync::{live_orchestrator, maybe_build_scheduler, SyncConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cpsync")]
#[command(about = "Competitive programming problem catalog sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass (default).
    Sync {
        /// Fetch details even if the catalog looks unchanged.
        #[arg(long)]
        force: bool,
        /// Wipe stored problems and sync states first.
        #[arg(long)]
        reset: bool,
    },
    /// Run sync on the configured cron schedule until interrupted.
    Schedule,
    /// Apply database migrations.
    Migrate,
    /// Delete all stored problems, tags, difficulties and sync states.
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Find stored problems by name, tag or rating.
    Search {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        rating: Option<i32>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Print one stored problem, e.g. `cpsync show 1520A`.
    Show { key: ProblemKey },
    /// Print row counts and the latest sync state.
    Status,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("installing tracing subscriber: {err}"))
}

fn print_stats(stats: &RunStats) {
    println!(
        "sync complete: run_id={} catalog={} changed={} processed={} skipped={} errors={} existing={}",
        stats.run_id,
        stats.catalog_size,
        stats.changed,
        stats.processed,
        stats.skipped,
        stats.errors,
        stats.existing
    );
}

fn print_problem_line(problem: &Problem) {
    let rating = problem
        .rating
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<8} {:<5} {}  [{}]",
        problem.key.to_string(),
        rating,
        problem.name,
        problem.tags.join(", ")
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    let command = cli.command.unwrap_or(Commands::Sync {
        force: false,
        reset: false,
    });

    match command {
        Commands::Sync { force, reset } => {
            let store = config.connect_store().await?;
            if reset {
                store.reset().await.context("resetting store")?;
                info!("store reset before sync");
            }
            let orchestrator = live_orchestrator(&config, store, force)?;
            let stats = orchestrator.run_sync().await?;
            print_stats(&stats);
        }
        Commands::Schedule => {
            let store = config.connect_store().await?;
            let orchestrator = Arc::new(live_orchestrator(&config, store, false)?);
            let job = move || {
                let orchestrator = orchestrator.clone();
                async move {
                    match orchestrator.run_sync().await {
                        Ok(stats) => print_stats(&stats),
                        Err(err) => error!(error = %err, "scheduled sync failed"),
                    }
                }
            };
            let Some(mut scheduler) =
                maybe_build_scheduler(config.scheduler_enabled, &config.sync_cron, job).await?
            else {
                bail!("scheduler disabled; set CPSYNC_SCHEDULER_ENABLED=1 to run `cpsync schedule`");
            };

            scheduler.start().await.context("starting scheduler")?;
            info!(cron = %config.sync_cron, "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            scheduler.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            config.connect_store().await?;
            println!("migrations applied");
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("refusing to delete all stored problems without --yes");
            }
            let store = config.connect_store().await?;
            store.reset().await.context("resetting store")?;
            println!("store reset");
        }
        Commands::Search {
            name,
            tag,
            rating,
            limit,
        } => {
            let store = config.connect_store().await?;
            let query = ProblemQuery {
                name,
                tag,
                rating,
                limit: Some(limit),
            };
            let problems = store.search(&query).await.context("searching problems")?;
            for problem in &problems {
                print_problem_line(problem);
            }
            println!("{} problem(s)", problems.len());
        }
        Commands::Show { key } => {
            let store = config.connect_store().await?;
            let Some(problem) = store.find_problem(&key).await.context("loading problem")? else {
                bail!("problem {key} is not stored");
            };
            print_problem_line(&problem);
            println!("type: {}", problem.kind);
            if let Some(solved) = problem.solved_count {
                println!("solved by: {solved}");
            }
            println!("stored at: {}", problem.created_at);
            println!();
            println!("{}", problem.statement);
        }
        Commands::Status => {
            let store = config.connect_store().await?;
            let counts = store.counts().await.context("counting rows")?;
            println!(
                "problems={} tags={} difficulties={}",
                counts.problems, counts.tags, counts.difficulties
            );
            match store
                .get_last_sync_state()
                .await
                .context("loading last sync state")?
            {
                Some(state) => println!(
                    "last sync: {} problems={} outstanding={} fingerprint={}",
                    state.recorded_at, state.problem_count, state.outstanding, state.fingerprint
                ),
                None => println!("last sync: never"),
            }
        }
    }

    Ok(())
}

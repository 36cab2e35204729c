use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use xentbench::bench::config::BenchmarkConfig;
use xentbench::bench::{aggregate, scheduler};
use xentbench::judge::download;
use xentbench::judge::gateway::{JudgeGateway, RetryPolicy};
use xentbench::judge::local::LocalJudge;
use xentbench::output::terminal;
use xentbench::trial::result::{read_json_lenient, TrialResult, TrialStatus};

mod config;

/// xentbench: run adversarial cross-entropy game benchmarks.
///
/// Expands a benchmark configuration into (game x map x player) trials,
/// runs them against a local judge model, and aggregates the results into
/// a leaderboard.
#[derive(Parser)]
#[command(name = "xentbench", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark from a condensed configuration file
    Run {
        /// Path to the benchmark configuration (JSON)
        config: PathBuf,

        /// Number of trials to run in parallel (default: 4)
        #[arg(long, default_value = "4")]
        parallelism: usize,
    },

    /// Recompute and print the leaderboard from stored trial files
    Report {
        /// Path to the benchmark configuration (JSON)
        config: PathBuf,

        /// Also print per-(game, player) detail
        #[arg(long)]
        detail: bool,
    },

    /// Show results-directory status (benchmarks, trial counts)
    Status,

    /// Download the judge model (~650 MB)
    DownloadJudge,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("xentbench=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config: config_path, parallelism } => {
            let env = config::Config::load()?;
            env.require_judge_model()?;

            let bench_config = BenchmarkConfig::load(&config_path)
                .with_context(|| format!("Failed to load {}", config_path.display()))?;
            info!(
                benchmark = %bench_config.metadata.benchmark_id,
                games = bench_config.games.len(),
                players = bench_config.players.len(),
                "Starting benchmark"
            );

            let judge = LocalJudge::load(&env.model_dir)?;
            let gateway = JudgeGateway::new(Arc::new(judge), RetryPolicy::default());
            let players = xentbench::bench::config::build_players(&bench_config)?;

            let opts = scheduler::SchedulerOptions {
                results_dir: env.results_dir.clone(),
                parallelism,
            };
            let result = scheduler::run_benchmark(&bench_config, &gateway, &players, &opts).await?;
            terminal::display_leaderboard(&result);
            println!(
                "Results written to {}",
                env.results_dir
                    .join(scheduler::sanitize(&bench_config.metadata.benchmark_id))
                    .display()
            );
        }

        Commands::Report { config: config_path, detail } => {
            let env = config::Config::load()?;
            let bench_config = BenchmarkConfig::load(&config_path)
                .with_context(|| format!("Failed to load {}", config_path.display()))?;
            let bench_dir = env
                .results_dir
                .join(scheduler::sanitize(&bench_config.metadata.benchmark_id));

            let (result, reports) = aggregate::aggregate(&bench_config, &bench_dir)?;
            terminal::display_leaderboard(&result);
            if detail {
                for report in &reports {
                    terminal::display_game_report(report);
                }
            }
        }

        Commands::Status => {
            let env = config::Config::load()?;
            status(&env.results_dir)?;
        }

        Commands::DownloadJudge => {
            let env = config::Config::load()?;
            download::download_judge(&env.model_dir).await?;
            println!("\nJudge model ready at {}", env.model_dir.display());
        }
    }

    Ok(())
}

/// Inventory the results directory: one line per benchmark with trial
/// counts broken down by status.
fn status(results_dir: &std::path::Path) -> Result<()> {
    if !results_dir.exists() {
        println!("No results directory at {} yet.", results_dir.display());
        return Ok(());
    }

    let mut found = false;
    for entry in std::fs::read_dir(results_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        found = true;

        let (mut ok, mut errored, mut cancelled, mut stuck, mut unreadable) = (0, 0, 0, 0, 0);
        for file in std::fs::read_dir(entry.path())? {
            let file = file?;
            let name = file.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("trial_") || !name.ends_with(".json") {
                continue;
            }
            match read_json_lenient::<TrialResult>(&file.path()) {
                Some(result) => match result.status {
                    TrialStatus::Ok => ok += 1,
                    TrialStatus::Errored => errored += 1,
                    TrialStatus::Cancelled => cancelled += 1,
                    TrialStatus::Stuck => stuck += 1,
                },
                None => unreadable += 1,
            }
        }

        println!(
            "{}: {} ok, {} errored, {} cancelled, {} stuck, {} partial",
            entry.file_name().to_string_lossy(),
            ok,
            errored,
            cancelled,
            stuck,
            unreadable
        );
    }

    if !found {
        println!("No benchmarks in {} yet.", results_dir.display());
    }
    Ok(())
}

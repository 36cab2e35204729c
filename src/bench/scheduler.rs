// Benchmark scheduler — expand, run with bounded parallelism, resume.
//
// Each trial's identity (game × player × map seed) is its result
// filename and its idempotency key: a trial whose file already parses is
// skipped, a partial file from a crashed run fails the parse and the
// trial is re-queued. Maps are built before the pool starts so trial
// workers never wait behind map generation.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::error::{Result, XentError};
use crate::game::machine::DEFAULT_ENSURE_RETRY_CAP;
use crate::judge::gateway::JudgeGateway;
use crate::player::presentation::presenter_by_name;
use crate::player::traits::Player;
use crate::trial::map::{self, GameMap};
use crate::trial::orchestrator::{run_trial, Game, TrialParams};
use crate::trial::result::{
    read_json_lenient, write_json_atomic, TrialError, TrialResult, TrialStatus,
};
use crate::xdl::parser::parse_program;

use super::aggregate::{self, BenchmarkResult};
use super::config::BenchmarkConfig;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub results_dir: PathBuf,
    /// Worker-pool size: how many trials progress concurrently.
    pub parallelism: usize,
}

/// Replace filename-hostile characters in an identity component.
pub fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// The result file for one trial identity.
pub fn trial_path(bench_dir: &Path, game: &str, player_id: &str, map_seed: &str) -> PathBuf {
    bench_dir.join(format!(
        "trial_{}_{}_{}.json",
        sanitize(game),
        sanitize(player_id),
        sanitize(map_seed)
    ))
}

struct PlannedTrial {
    game: Game,
    map: GameMap,
    player_id: String,
    player: Arc<dyn Player>,
    params: TrialParams,
    path: PathBuf,
}

/// Run a benchmark to completion: expansion, trial pool, aggregation.
///
/// `backends` supplies one built back-end per configured player id (see
/// `config::build_players` for the production wiring); injecting them
/// keeps the scheduler testable against scripted players.
pub async fn run_benchmark(
    config: &BenchmarkConfig,
    gateway: &JudgeGateway,
    backends: &[(String, Arc<dyn Player>)],
    opts: &SchedulerOptions,
) -> Result<BenchmarkResult> {
    config.validate()?;

    let bench_dir = opts.results_dir.join(sanitize(&config.metadata.benchmark_id));
    let maps_dir = bench_dir.join("maps");
    std::fs::create_dir_all(&maps_dir)?;

    // Parse every game up front. A game that fails to parse (or names an
    // unknown presenter) is skipped wholesale: each of its trials gets an
    // errored result file so the benchmark still completes.
    let mut games = Vec::new();
    for spec in &config.games {
        let parsed = parse_program(&spec.source).and_then(|program| {
            Ok(Game {
                name: spec.name.clone(),
                program: Arc::new(program),
                presenter: presenter_by_name(&spec.presentation)?,
            })
        });
        match parsed {
            Ok(game) => games.push(game),
            Err(err) => {
                warn!(game = %spec.name, error = %err, "Game rejected; erroring its trials");
                persist_failures(config, &bench_dir, &spec.name, &err)?;
            }
        }
    }

    // Pair every configured player with its back-end. Back-ends are
    // shared across all of a player's trials.
    let mut players: Vec<(String, Arc<dyn Player>, TrialParams)> = Vec::new();
    for spec in &config.players {
        let backend = backends
            .iter()
            .find(|(id, _)| *id == spec.id)
            .map(|(_, player)| Arc::clone(player))
            .ok_or_else(|| {
                XentError::Config(format!("no back-end provided for player `{}`", spec.id))
            })?;
        players.push((
            spec.id.clone(),
            backend,
            TrialParams {
                max_rounds: config.metadata.num_rounds_per_game,
                timeout: std::time::Duration::from_secs(config.metadata.trial_timeout_secs),
                ensure_retry_cap: DEFAULT_ENSURE_RETRY_CAP,
                request_params: spec.options.request_params.clone(),
            },
        ));
    }

    // Build (or reload) all maps before dispatching trials, so map
    // generation never head-of-line blocks the trial pool.
    let story_source = config.expansion.story_source();
    let mut maps: HashMap<(String, String), GameMap> = HashMap::new();
    for game in &games {
        for seed in config.map_seeds(&game.name) {
            match map::load_or_build(&maps_dir, &game.name, &game.program, &seed, gateway, &story_source)
                .await
            {
                Ok(map) => {
                    maps.insert((game.name.clone(), seed), map);
                }
                Err(err) => {
                    warn!(game = %game.name, seed = %seed, error = %err, "Map build failed");
                    for (player_id, _, _) in &players {
                        let path = trial_path(&bench_dir, &game.name, player_id, &seed);
                        if read_json_lenient::<TrialResult>(&path).is_none() {
                            write_json_atomic(
                                &path,
                                &errored_result(&game.name, &seed, player_id, &err),
                            )?;
                        }
                    }
                }
            }
        }
    }

    // Expand to the trial list, skipping identities that are already done.
    let mut planned = Vec::new();
    let mut skipped = 0usize;
    for game in &games {
        for seed in config.map_seeds(&game.name) {
            let Some(map) = maps.get(&(game.name.clone(), seed.clone())) else {
                continue;
            };
            for (player_id, player, params) in &players {
                let path = trial_path(&bench_dir, &game.name, player_id, &seed);
                if read_json_lenient::<TrialResult>(&path).is_some() {
                    skipped += 1;
                    continue;
                }
                planned.push(PlannedTrial {
                    game: game.clone(),
                    map: map.clone(),
                    player_id: player_id.clone(),
                    player: Arc::clone(player),
                    params: params.clone(),
                    path,
                });
            }
        }
    }

    info!(
        planned = planned.len(),
        skipped,
        parallelism = opts.parallelism,
        "Benchmark expanded"
    );

    let pb = ProgressBar::new(planned.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  Trials [{bar:30}] {pos}/{len} ({eta})")
            .expect("valid template"),
    );

    // The worker pool: trials progress concurrently up to the cap, each
    // single-threaded internally.
    let outcomes: Vec<Result<()>> = stream::iter(planned.into_iter().map(|trial| {
        let pb = pb.clone();
        async move {
            let result = run_trial(
                &trial.game,
                &trial.map,
                &trial.player_id,
                trial.player,
                gateway,
                &trial.params,
            )
            .await;
            write_json_atomic(&trial.path, &result)?;
            append_log(
                &trial.path,
                &trial.game.name,
                &trial.player_id,
                &trial.map.map_seed,
                &result,
            );
            pb.inc(1);
            Ok(())
        }
    }))
    .buffer_unordered(opts.parallelism.max(1))
    .collect()
    .await;
    pb.finish_and_clear();

    for outcome in outcomes {
        outcome?;
    }

    let (result, reports) = aggregate::aggregate(config, &bench_dir)?;
    aggregate::write_reports(&bench_dir, &result, &reports)?;
    Ok(result)
}

/// Write errored result files for every trial of a rejected game.
fn persist_failures(
    config: &BenchmarkConfig,
    bench_dir: &Path,
    game: &str,
    err: &XentError,
) -> Result<()> {
    for seed in config.map_seeds(game) {
        for player in &config.players {
            let path = trial_path(bench_dir, game, &player.id, &seed);
            if read_json_lenient::<TrialResult>(&path).is_none() {
                write_json_atomic(&path, &errored_result(game, &seed, &player.id, err))?;
            }
        }
    }
    Ok(())
}

fn errored_result(game: &str, seed: &str, player_id: &str, err: &XentError) -> TrialResult {
    let now = Utc::now().to_rfc3339();
    TrialResult {
        game: game.to_string(),
        map_seed: seed.to_string(),
        player_id: player_id.to_string(),
        events: Vec::new(),
        rounds: Vec::new(),
        headline_score: 0.0,
        status: TrialStatus::Errored,
        error: Some(TrialError::from(err)),
        started_at: now.clone(),
        finished_at: now,
    }
}

/// Append a one-line trial summary to the benchmark's log.txt.
fn append_log(trial_file: &Path, game: &str, player_id: &str, seed: &str, result: &TrialResult) {
    let Some(bench_dir) = trial_file.parent() else {
        return;
    };
    let line = format!(
        "{} trial game={game} player={player_id} seed={seed} status={:?} headline={:.4}\n",
        Utc::now().to_rfc3339(),
        result.status,
        result.headline_score,
    );
    let opened = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(bench_dir.join("log.txt"));
    match opened {
        Ok(mut file) => {
            if let Err(err) = file.write_all(line.as_bytes()) {
                warn!(error = %err, "Failed to append to log.txt");
            }
        }
        Err(err) => warn!(error = %err, "Failed to open log.txt"),
    }
}

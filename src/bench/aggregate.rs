// Offline aggregation — the leaderboard derives only from stored files.
//
// Nothing is aggregated online: once all trial files are on disk, this
// module recomputes per-player and per-game scores from scratch, so a
// benchmark is always recomputable after crashes, resumes or manual
// deletion of individual trials.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::trial::result::{read_json_lenient, write_json_atomic, TrialResult, TrialStatus};

use super::config::BenchmarkConfig;
use super::scheduler::trial_path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialBrief {
    pub map_seed: String,
    pub headline_score: f64,
    pub status: TrialStatus,
}

/// Per-(game, player) aggregation, written to `game_<game>_<player>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamePlayerReport {
    pub game: String,
    pub player_id: String,
    /// Mean trial headline score over this game's maps.
    pub score: f64,
    /// Mean running-max score after each round, for line charts.
    pub iteration_scores: Vec<f64>,
    pub trials: Vec<TrialBrief>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameScore {
    pub game: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStanding {
    pub player_id: String,
    /// Mean over games of the per-game score.
    pub overall_score: f64,
    pub per_game: Vec<GameScore>,
}

/// The scheduler-level record, written to `benchmark_<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub benchmark_id: String,
    pub judge_model: String,
    pub generated_at: String,
    /// Standings sorted by overall score, best first.
    pub players: Vec<PlayerStanding>,
}

/// Recompute the benchmark aggregate from trial files on disk.
pub fn aggregate(
    config: &BenchmarkConfig,
    bench_dir: &Path,
) -> Result<(BenchmarkResult, Vec<GamePlayerReport>)> {
    let mut reports = Vec::new();
    let mut standings = Vec::new();

    for player in &config.players {
        let mut per_game = Vec::new();
        for game in &config.games {
            let report = aggregate_game_player(config, bench_dir, &game.name, &player.id);
            per_game.push(GameScore { game: game.name.clone(), score: report.score });
            reports.push(report);
        }

        let overall_score = mean(per_game.iter().map(|g| g.score));
        standings.push(PlayerStanding {
            player_id: player.id.clone(),
            overall_score,
            per_game,
        });
    }

    standings.sort_by(|a, b| {
        b.overall_score
            .partial_cmp(&a.overall_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok((
        BenchmarkResult {
            benchmark_id: config.metadata.benchmark_id.clone(),
            judge_model: config.metadata.judge_model.clone(),
            generated_at: Utc::now().to_rfc3339(),
            players: standings,
        },
        reports,
    ))
}

fn aggregate_game_player(
    config: &BenchmarkConfig,
    bench_dir: &Path,
    game: &str,
    player_id: &str,
) -> GamePlayerReport {
    let mut trials = Vec::new();
    let mut running_maxes: Vec<Vec<f64>> = Vec::new();

    for seed in config.map_seeds(game) {
        let path = trial_path(bench_dir, game, player_id, &seed);
        let Some(result) = read_json_lenient::<TrialResult>(&path) else {
            warn!(game, player_id, seed = %seed, "Missing or unparseable trial file, skipping");
            continue;
        };

        running_maxes.push(running_max(&result));
        trials.push(TrialBrief {
            map_seed: result.map_seed,
            headline_score: result.headline_score,
            status: result.status,
        });
    }

    let score = mean(trials.iter().map(|t| t.headline_score));
    let iteration_scores = mean_columns(&running_maxes);

    GamePlayerReport {
        game: game.to_string(),
        player_id: player_id.to_string(),
        score,
        iteration_scores,
        trials,
    }
}

/// The running maximum of round scores: entry r is the best score the
/// player had achieved by the end of round r.
fn running_max(result: &TrialResult) -> Vec<f64> {
    let mut best = f64::NEG_INFINITY;
    result
        .rounds
        .iter()
        .map(|round| {
            best = best.max(round.score);
            best
        })
        .collect()
}

/// Elementwise mean over rows of unequal length; shorter rows are padded
/// with their final value (the player's score no longer changes once its
/// trial is over).
fn mean_columns(rows: &[Vec<f64>]) -> Vec<f64> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
        .map(|col| {
            mean(rows.iter().filter_map(|row| {
                if row.is_empty() {
                    None
                } else {
                    Some(*row.get(col).unwrap_or_else(|| row.last().expect("nonempty")))
                }
            }))
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Persist the aggregate files next to the trial results.
pub fn write_reports(
    bench_dir: &Path,
    result: &BenchmarkResult,
    reports: &[GamePlayerReport],
) -> Result<()> {
    write_json_atomic(
        &bench_dir.join(format!("benchmark_{}.json", result.benchmark_id)),
        result,
    )?;
    for report in reports {
        let name = format!(
            "game_{}_{}.json",
            super::scheduler::sanitize(&report.game),
            super::scheduler::sanitize(&report.player_id)
        );
        write_json_atomic(&bench_dir.join(name), report)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::result::RoundSummary;

    fn result_with_rounds(scores: &[f64]) -> TrialResult {
        TrialResult {
            game: "g".into(),
            map_seed: "s".into(),
            player_id: "p".into(),
            events: vec![],
            rounds: scores
                .iter()
                .enumerate()
                .map(|(i, s)| RoundSummary {
                    index: i as u32,
                    score: *s,
                    arms: 1,
                    iterations: 1,
                    stuck: false,
                })
                .collect(),
            headline_score: scores.iter().cloned().fold(0.0, f64::max),
            status: TrialStatus::Ok,
            error: None,
            started_at: String::new(),
            finished_at: String::new(),
        }
    }

    #[test]
    fn running_max_is_monotone() {
        let result = result_with_rounds(&[2.1, 1.0, 3.7, 3.5, 2.9]);
        assert_eq!(running_max(&result), vec![2.1, 2.1, 3.7, 3.7, 3.7]);
    }

    #[test]
    fn mean_columns_pads_short_rows_with_final_value() {
        let rows = vec![vec![1.0, 2.0, 3.0], vec![4.0]];
        assert_eq!(mean_columns(&rows), vec![2.5, 3.0, 3.5]);
    }

    #[test]
    fn mean_of_nothing_is_zero() {
        assert_eq!(mean(std::iter::empty()), 0.0);
        assert!(mean_columns(&[]).is_empty());
    }
}

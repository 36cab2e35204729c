// Colored terminal output for leaderboards and benchmark status.
//
// This module handles all terminal-specific formatting: the main.rs
// display paths delegate here so the scheduler stays print-free.

use colored::Colorize;

use crate::bench::aggregate::{BenchmarkResult, GamePlayerReport};
use crate::trial::result::TrialStatus;

/// Display the benchmark leaderboard.
pub fn display_leaderboard(result: &BenchmarkResult) {
    println!(
        "\n{}",
        format!(
            "=== Benchmark {} (judge: {}) ===",
            result.benchmark_id, result.judge_model
        )
        .bold()
    );
    println!();

    if result.players.is_empty() {
        println!("No players in this benchmark.");
        return;
    }

    println!(
        "  {:>4}  {:<24} {:>10}",
        "Rank".dimmed(),
        "Player".dimmed(),
        "Score".dimmed(),
    );
    println!("  {}", "-".repeat(44).dimmed());

    for (i, standing) in result.players.iter().enumerate() {
        println!(
            "  {:>4}. {:<24} {:>10.3}",
            i + 1,
            standing.player_id,
            standing.overall_score,
        );
        for game in &standing.per_game {
            println!("        {:<22} {:>10.3}", game.game.dimmed(), game.score);
        }
    }
    println!();
}

/// Display one (game, player) aggregation with its trial outcomes.
pub fn display_game_report(report: &GamePlayerReport) {
    println!(
        "\n{}",
        format!("=== {} / {} ===", report.game, report.player_id).bold()
    );
    println!(
        "  score: {:.3} bits over {} maps",
        report.score,
        report.trials.len()
    );

    for trial in &report.trials {
        let status = match trial.status {
            TrialStatus::Ok => "ok".green(),
            TrialStatus::Stuck => "stuck".yellow(),
            TrialStatus::Cancelled => "cancelled".yellow(),
            TrialStatus::Errored => "errored".red(),
        };
        println!(
            "    map {:<18} {:>8.3}  {}",
            trial.map_seed, trial.headline_score, status
        );
    }

    if !report.iteration_scores.is_empty() {
        let chart: Vec<String> = report
            .iteration_scores
            .iter()
            .map(|s| format!("{s:.2}"))
            .collect();
        println!("  running max by round: {}", chart.join(" -> ").dimmed());
    }
}

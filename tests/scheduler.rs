// Scheduler behavior over a real results directory: expansion,
// resumption, idempotency, per-game parse failures, and the bounded
// worker pool.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use common::fake_gateway;
use xentbench::bench::config::BenchmarkConfig;
use xentbench::bench::scheduler::{run_benchmark, trial_path, SchedulerOptions};
use xentbench::error::Result;
use xentbench::player::scripted::ScriptedPlayer;
use xentbench::player::traits::{ChatMessage, Player, RequestParams};
use xentbench::trial::result::{read_json_lenient, TrialResult, TrialStatus};

const ELICIT_GAME: &str = "assign(s=story())\nbeacon()\nelicit(x, 4)\nreward(dex(s | x))";
const STATIC_GAME: &str = "assign(s=story())\nreveal(s)\nreward(xed(s))";

fn config(games: &[(&str, &str)], player_ids: &[&str], maps: u32) -> BenchmarkConfig {
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "benchmark_id": "bench1",
            "judge_model": "fake",
            "num_rounds_per_game": 2,
            "seed": 1234
        },
        "expansion": {
            "num_maps_per_game": maps,
            "story_generator": "COMMUNITY_ARCHIVE",
            "max_story_tokens": 16
        },
        "players": player_ids
            .iter()
            .map(|id| serde_json::json!({ "id": id, "type": "llm" }))
            .collect::<Vec<_>>(),
        "games": games
            .iter()
            .map(|(name, source)| serde_json::json!({ "name": name, "source": source }))
            .collect::<Vec<_>>(),
    }))
    .unwrap()
}

/// A player that always answers with the same move, so re-runs produce
/// identical trial files.
fn steady_player(game_move: &str) -> Arc<dyn Player> {
    Arc::new(ScriptedPlayer::new(vec![]).with_fallback(format!("<move>{game_move}</move>")))
}

fn opts(results_dir: &Path, parallelism: usize) -> SchedulerOptions {
    SchedulerOptions { results_dir: results_dir.to_path_buf(), parallelism }
}

fn read_all_trials(config: &BenchmarkConfig, bench_dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    for game in &config.games {
        for seed in config.map_seeds(&game.name) {
            for player in &config.players {
                let path = trial_path(bench_dir, &game.name, &player.id, &seed);
                if let Ok(bytes) = std::fs::read(&path) {
                    out.push((path.to_string_lossy().to_string(), bytes));
                }
            }
        }
    }
    out
}

#[tokio::test]
async fn resumption_recomputes_only_deleted_trials() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&[("g1", ELICIT_GAME), ("g2", STATIC_GAME)], &["p1", "p2"], 3);
    let backends = vec![
        ("p1".to_string(), steady_player("fairy tale:")),
        ("p2".to_string(), steady_player("dragon story")),
    ];
    let gateway = fake_gateway();
    let scheduler_opts = opts(dir.path(), 4);

    run_benchmark(&cfg, &gateway, &backends, &scheduler_opts).await.unwrap();

    let bench_dir = dir.path().join("bench1");
    let first_run = read_all_trials(&cfg, &bench_dir);
    assert_eq!(first_run.len(), 12, "2 games x 3 maps x 2 players");

    // Delete player p2's trials for game g1 (3 files).
    for seed in cfg.map_seeds("g1") {
        std::fs::remove_file(trial_path(&bench_dir, "g1", "p2", &seed)).unwrap();
    }

    run_benchmark(&cfg, &gateway, &backends, &scheduler_opts).await.unwrap();
    let second_run = read_all_trials(&cfg, &bench_dir);
    assert_eq!(second_run.len(), 12);

    // The 9 untouched trials are byte-for-byte identical.
    let untouched_before: Vec<_> = first_run
        .iter()
        .filter(|(path, _)| !path.contains("_p2_") || path.contains("_g2_"))
        .collect();
    for (path, bytes) in untouched_before {
        let after = second_run
            .iter()
            .find(|(p, _)| p == path)
            .expect("file still present");
        assert_eq!(&after.1, bytes, "{path} was rewritten");
    }
}

#[tokio::test]
async fn second_run_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&[("g1", ELICIT_GAME)], &["p1"], 2);
    let backends = vec![("p1".to_string(), steady_player("a prefix"))];
    let gateway = fake_gateway();
    let scheduler_opts = opts(dir.path(), 2);

    run_benchmark(&cfg, &gateway, &backends, &scheduler_opts).await.unwrap();
    let bench_dir = dir.path().join("bench1");
    let first = read_all_trials(&cfg, &bench_dir);
    assert_eq!(first.len(), 2);

    run_benchmark(&cfg, &gateway, &backends, &scheduler_opts).await.unwrap();
    assert_eq!(read_all_trials(&cfg, &bench_dir), first);
}

#[tokio::test]
async fn aggregates_and_maps_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&[("g1", ELICIT_GAME)], &["p1"], 2);
    let backends = vec![("p1".to_string(), steady_player("once more"))];
    let gateway = fake_gateway();

    let result = run_benchmark(&cfg, &gateway, &backends, &opts(dir.path(), 2))
        .await
        .unwrap();

    assert_eq!(result.players.len(), 1);
    let standing = &result.players[0];
    assert_eq!(standing.player_id, "p1");
    assert_eq!(standing.per_game.len(), 1);

    // The per-game score is the mean headline over its maps.
    let bench_dir = dir.path().join("bench1");
    let mut headlines = Vec::new();
    for seed in cfg.map_seeds("g1") {
        let trial: TrialResult =
            read_json_lenient(&trial_path(&bench_dir, "g1", "p1", &seed)).unwrap();
        assert_eq!(trial.status, TrialStatus::Ok);
        headlines.push(trial.headline_score);

        // Maps are memoised next to the results.
        assert!(bench_dir.join("maps").join(format!("map_g1_{seed}.json")).exists());
    }
    let mean: f64 = headlines.iter().sum::<f64>() / headlines.len() as f64;
    assert!((standing.per_game[0].score - mean).abs() < 1e-9);
    assert!((standing.overall_score - mean).abs() < 1e-9);

    assert!(bench_dir.join("benchmark_bench1.json").exists());
    assert!(bench_dir.join("game_g1_p1.json").exists());
    assert!(bench_dir.join("log.txt").exists());
}

#[tokio::test]
async fn unparseable_game_errors_all_its_trials() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
        &[("good", STATIC_GAME), ("bad", "frobnicate(x)")],
        &["p1"],
        2,
    );
    let backends = vec![("p1".to_string(), steady_player("move"))];
    let gateway = fake_gateway();

    run_benchmark(&cfg, &gateway, &backends, &opts(dir.path(), 2))
        .await
        .unwrap();

    let bench_dir = dir.path().join("bench1");
    for seed in cfg.map_seeds("bad") {
        let trial: TrialResult =
            read_json_lenient(&trial_path(&bench_dir, "bad", "p1", &seed)).unwrap();
        assert_eq!(trial.status, TrialStatus::Errored);
        assert_eq!(trial.error.unwrap().kind, "parse");
        assert!(trial.events.is_empty());
    }
    for seed in cfg.map_seeds("good") {
        let trial: TrialResult =
            read_json_lenient(&trial_path(&bench_dir, "good", "p1", &seed)).unwrap();
        assert_eq!(trial.status, TrialStatus::Ok);
    }
}

#[tokio::test]
async fn judge_generated_maps_are_deterministic() {
    use xentbench::trial::map::{build, StorySource};
    use xentbench::xdl::parser::parse_program;

    let gateway = fake_gateway();
    let program = parse_program(ELICIT_GAME).unwrap();
    let source = StorySource::Judge { max_tokens: 12 };

    let a = build("g1", &program, "seed-a", &gateway, &source).await.unwrap();
    let b = build("g1", &program, "seed-a", &gateway, &source).await.unwrap();
    let other = build("g1", &program, "seed-b", &gateway, &source).await.unwrap();

    assert_eq!(a, b, "same seed, same map");
    assert_ne!(a.story, other.story, "different seeds diverge");
    // The assign prefix bound the story.
    assert_eq!(a.bindings, vec![("s".to_string(), a.story.clone())]);
}

/// Tracks how many completions are in flight at once.
struct GaugedPlayer {
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Player for GaugedPlayer {
    async fn complete(
        &self,
        _transcript: &[ChatMessage],
        _max_tokens: u32,
        _params: &RequestParams,
    ) -> Result<String> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok("<move>steady</move>".to_string())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_bounds_concurrent_trials() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&[("g1", ELICIT_GAME)], &["p1", "p2"], 3);
    let player = Arc::new(GaugedPlayer {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let backends: Vec<(String, Arc<dyn Player>)> = vec![
        ("p1".to_string(), Arc::clone(&player) as Arc<dyn Player>),
        ("p2".to_string(), Arc::clone(&player) as Arc<dyn Player>),
    ];
    let gateway = fake_gateway();

    // 6 trials, cap 2: the pool saturates without deadlocking.
    run_benchmark(&cfg, &gateway, &backends, &opts(dir.path(), 2))
        .await
        .unwrap();

    let peak = player.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "concurrency cap violated: {peak} trials in elicit at once");
    assert!(peak >= 1);
    assert_eq!(read_all_trials(&cfg, &dir.path().join("bench1")).len(), 6);
}

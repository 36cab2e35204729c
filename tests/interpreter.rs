// End-to-end interpreter and trial scenarios over the fake judge:
// condense scoring, ensure rollback, truncation, multi-round headline,
// tokenization drift, and failure statuses.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{fake_gateway, gateway_over, DriftingJudge};
use xentbench::error::{Result, XentError};
use xentbench::game::events::Event;
use xentbench::judge::gateway::JudgeGateway;
use xentbench::player::presentation::DefaultPresenter;
use xentbench::player::scripted::ScriptedPlayer;
use xentbench::player::traits::{ChatMessage, Player, RequestParams};
use xentbench::trial::map::GameMap;
use xentbench::trial::orchestrator::{run_trial, Game, TrialParams};
use xentbench::trial::result::{TrialResult, TrialStatus};
use xentbench::xdl::parser::parse_program;

const CONDENSE: &str = "\
assign(s=story())
beacon()
elicit(x, 5)
reward(dex(s | x))
";

const ENSURE_GAME: &str = "\
assign(s=story())
beacon()
elicit(x, 5)
assign(y=remove_common_words(x, s))
ensure(len(y) >= 1)
reward(xed(s | y))
";

fn game(source: &str) -> Game {
    Game {
        name: "test-game".to_string(),
        program: Arc::new(parse_program(source).unwrap()),
        presenter: Arc::new(DefaultPresenter),
    }
}

fn map_with_story(story: &str) -> GameMap {
    GameMap {
        game: "test-game".to_string(),
        map_seed: "seed0".to_string(),
        story: story.to_string(),
        bindings: vec![("s".to_string(), story.to_string())],
    }
}

fn params(max_rounds: u32) -> TrialParams {
    TrialParams {
        max_rounds,
        timeout: Duration::from_secs(300),
        ensure_retry_cap: 8,
        request_params: RequestParams::default(),
    }
}

async fn play(
    gateway: &JudgeGateway,
    source: &str,
    story: &str,
    moves: &[&str],
    max_rounds: u32,
) -> TrialResult {
    run_trial(
        &game(source),
        &map_with_story(story),
        "tester",
        Arc::new(ScriptedPlayer::with_moves(moves)),
        gateway,
        &params(max_rounds),
    )
    .await
}

fn count_events(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

#[tokio::test]
async fn condense_reward_is_the_context_gain() {
    let gateway = fake_gateway();
    let story = "once upon a time there was a brave knight";
    let result = play(&gateway, CONDENSE, story, &["fairy tale:"], 1).await;

    assert_eq!(result.status, TrialStatus::Ok);
    assert_eq!(result.rounds.len(), 1);
    assert_eq!(result.rounds[0].arms, 1);
    assert_eq!(result.rounds[0].iterations, 1);

    let plain = gateway.score(story, "").await.unwrap();
    let conditioned = gateway.score(story, "fairy tale:").await.unwrap();
    let expected = plain.total() - conditioned.total();

    assert!((result.rounds[0].score - expected).abs() < 1e-9);
    assert!((result.headline_score - expected).abs() < 1e-9);

    // The reward's surfaces reproduce the scored text.
    let reward_surface: String = result
        .events
        .iter()
        .find_map(|e| match e {
            Event::Reward { value, .. } => Some(value.surface()),
            _ => None,
        })
        .expect("reward event");
    assert_eq!(reward_surface, story);
}

#[tokio::test]
async fn failed_ensure_rolls_back_to_the_beacon() {
    let gateway = fake_gateway();
    let story = "once upon a time";
    // First move only reuses the story's words, so remove_common_words
    // leaves nothing and the ensure fails; the second brings fresh words.
    let result = play(&gateway, ENSURE_GAME, story, &["once upon", "dragon castle"], 1).await;

    assert_eq!(result.status, TrialStatus::Ok);

    let failed_at = result
        .events
        .iter()
        .position(|e| matches!(e, Event::FailedEnsure { .. }))
        .expect("failed_ensure event");
    match &result.events[failed_at] {
        Event::FailedEnsure { beacon_line, ensure_results, .. } => {
            assert_eq!(*beacon_line, 2);
            assert_eq!(ensure_results, &vec![false]);
        }
        _ => unreachable!(),
    }
    // The failure cites the ensure's own line, and the beacon line it
    // cites appears earlier in the program.
    assert_eq!(result.events[failed_at].line_num(), 5);

    // A fresh elicit_request follows the failure; the discarded first
    // attempt is gone from the log.
    assert!(matches!(
        result.events[failed_at + 1],
        Event::ElicitRequest { .. }
    ));
    assert_eq!(
        count_events(&result.events, |e| matches!(e, Event::ElicitRequest { .. })),
        1
    );
    // The round counter did not advance.
    assert_eq!(
        count_events(&result.events, |e| matches!(e, Event::RoundStarted { .. })),
        1
    );
    // Every surviving request was answered exactly once.
    assert_eq!(
        count_events(&result.events, |e| matches!(e, Event::ElicitRequest { .. })),
        count_events(&result.events, |e| matches!(e, Event::ElicitResponse { .. })),
    );
    assert_eq!(result.rounds[0].arms, 1);
}

struct CountingPlayer {
    calls: AtomicU32,
}

#[async_trait]
impl Player for CountingPlayer {
    async fn complete(
        &self,
        _transcript: &[ChatMessage],
        _max_tokens: u32,
        _params: &RequestParams,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("<move>never used</move>".to_string())
    }
}

#[tokio::test]
async fn zero_token_elicit_skips_the_back_end() {
    let gateway = fake_gateway();
    let player = Arc::new(CountingPlayer { calls: AtomicU32::new(0) });

    let result = run_trial(
        &game("elicit(x, 0)\nreveal(x)"),
        &map_with_story(""),
        "tester",
        Arc::clone(&player) as Arc<dyn Player>,
        &gateway,
        &params(1),
    )
    .await;

    assert_eq!(result.status, TrialStatus::Ok);
    assert_eq!(player.calls.load(Ordering::SeqCst), 0);

    let response = result
        .events
        .iter()
        .find_map(|e| match e {
            Event::ElicitResponse { response_text, .. } => Some(response_text.clone()),
            _ => None,
        })
        .expect("elicit_response");
    assert_eq!(response, "");
}

#[tokio::test]
async fn oversized_moves_truncate_at_token_boundaries() {
    let gateway = fake_gateway();
    let result = play(
        &gateway,
        "elicit(x, 3)\nreveal(x)",
        "",
        &["alpha beta gamma delta epsilon"],
        1,
    )
    .await;

    let response = result
        .events
        .iter()
        .find_map(|e| match e {
            Event::ElicitResponse { response_text, .. } => Some(response_text.clone()),
            _ => None,
        })
        .expect("elicit_response");
    assert_eq!(response, "alpha beta gamma");
}

#[tokio::test]
async fn headline_is_the_best_round() {
    let gateway = fake_gateway();
    let story = "once upon a time there was a brave knight";
    let result = play(
        &gateway,
        CONDENSE,
        story,
        &["fairy tale:", "brave knight story", "dragon"],
        3,
    )
    .await;

    assert_eq!(result.rounds.len(), 3);
    let best = result
        .rounds
        .iter()
        .map(|r| r.score)
        .fold(f64::NEG_INFINITY, f64::max);
    assert!((result.headline_score - best).abs() < 1e-12);
    // Round indices are monotonic from zero.
    for (i, round) in result.rounds.iter().enumerate() {
        assert_eq!(round.index, i as u32);
    }
}

#[tokio::test]
async fn identical_seeds_replay_identically() {
    let story = "once upon a time there was a brave knight";
    let moves = ["fairy tale:", "brave knight story"];

    let a = play(&fake_gateway(), CONDENSE, story, &moves, 2).await;
    let b = play(&fake_gateway(), CONDENSE, story, &moves, 2).await;

    assert_eq!(a.events, b.events);
    assert_eq!(a.rounds, b.rounds);
    assert_eq!(a.headline_score, b.headline_score);
}

#[tokio::test]
async fn tokenization_drift_fails_the_trial() {
    let gateway = gateway_over(Arc::new(DriftingJudge::new()));
    let story = "once upon a time";
    let result = play(&gateway, CONDENSE, story, &["fairy tale:"], 1).await;

    assert_eq!(result.status, TrialStatus::Errored);
    let error = result.error.expect("error recorded");
    assert_eq!(error.kind, "scoring_alignment");
}

#[tokio::test]
async fn exhausted_ensure_budget_marks_the_round_stuck() {
    let gateway = fake_gateway();
    let source = "\
beacon()
elicit(x, 2)
ensure(len(x) >= 99)
reward(xed(x))
";
    let mut p = params(1);
    p.ensure_retry_cap = 3;
    let result = run_trial(
        &game(source),
        &map_with_story(""),
        "tester",
        Arc::new(ScriptedPlayer::with_moves(&["tiny"])),
        &gateway,
        &p,
    )
    .await;

    assert_eq!(result.status, TrialStatus::Stuck);
    assert_eq!(result.rounds.len(), 1);
    assert!(result.rounds[0].stuck);
    assert_eq!(result.rounds[0].iterations, 0);
    assert_eq!(result.headline_score, 0.0);
    assert!(result
        .events
        .iter()
        .any(|e| matches!(e, Event::FailedEnsure { .. })));
    // An abandoned round never finishes.
    assert!(!result
        .events
        .iter()
        .any(|e| matches!(e, Event::RoundFinished { .. })));
}

struct DeadPlayer;

#[async_trait]
impl Player for DeadPlayer {
    async fn complete(
        &self,
        _transcript: &[ChatMessage],
        _max_tokens: u32,
        _params: &RequestParams,
    ) -> Result<String> {
        Err(XentError::PlayerUnavailable("connection refused".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn dead_player_errors_the_trial_after_retries() {
    let gateway = fake_gateway();
    let result = run_trial(
        &game(CONDENSE),
        &map_with_story("once upon a time"),
        "tester",
        Arc::new(DeadPlayer),
        &gateway,
        &params(1),
    )
    .await;

    assert_eq!(result.status, TrialStatus::Errored);
    assert_eq!(result.error.expect("error").kind, "player_unavailable");
}

struct HangingPlayer;

#[async_trait]
impl Player for HangingPlayer {
    async fn complete(
        &self,
        _transcript: &[ChatMessage],
        _max_tokens: u32,
        _params: &RequestParams,
    ) -> Result<String> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn wall_clock_cap_cancels_the_trial() {
    let gateway = fake_gateway();
    let mut p = params(1);
    p.timeout = Duration::from_millis(50);

    let result = run_trial(
        &game(CONDENSE),
        &map_with_story("once upon a time"),
        "tester",
        Arc::new(HangingPlayer),
        &gateway,
        &p,
    )
    .await;

    assert_eq!(result.status, TrialStatus::Cancelled);
    assert_eq!(result.error.expect("error").kind, "trial_timeout");
}

// Trial orchestration — drive one interpreter to a persisted result.
//
// A trial exclusively owns its interpreter, register file, event log and
// player adapter; they are created here and dropped when the trial ends.
// The orchestrator never panics a failure upward: every outcome, however
// bad, is folded into a TrialResult so the scheduler can persist it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::XentError;
use crate::game::events::Event;
use crate::game::machine::Interpreter;
use crate::judge::gateway::JudgeGateway;
use crate::player::adapter::PlayerAdapter;
use crate::player::presentation::{GameMetadata, Presenter};
use crate::player::traits::{Player, RequestParams};
use crate::xdl::ast::Program;

use super::map::GameMap;
use super::result::{headline_score, RoundSummary, TrialError, TrialResult, TrialStatus};

/// A game ready to run: parsed program plus its presentation function.
#[derive(Clone)]
pub struct Game {
    pub name: String,
    pub program: Arc<Program>,
    pub presenter: Arc<dyn Presenter>,
}

/// Per-trial run parameters.
#[derive(Debug, Clone)]
pub struct TrialParams {
    pub max_rounds: u32,
    /// Wall-clock cap for the whole trial.
    pub timeout: Duration,
    /// Failures allowed per ensure call site per round before the round
    /// is abandoned as stuck.
    pub ensure_retry_cap: u32,
    pub request_params: RequestParams,
}

/// Run one (game, map, player) trial to completion. Infallible by
/// construction: failures become the result's status and error fields.
pub async fn run_trial(
    game: &Game,
    map: &GameMap,
    player_id: &str,
    player: Arc<dyn Player>,
    gateway: &JudgeGateway,
    params: &TrialParams,
) -> TrialResult {
    let started_at = Utc::now().to_rfc3339();

    let driven = tokio::time::timeout(
        params.timeout,
        drive(game, map, player_id, player, gateway, params),
    )
    .await;

    let (events, rounds, error) = match driven {
        Ok(outcome) => outcome,
        Err(_elapsed) => {
            // The interpreter future was dropped; outstanding back-end
            // calls were cancelled with it.
            let err = XentError::TrialTimeout { seconds: params.timeout.as_secs() };
            warn!(game = %game.name, player_id, "Trial hit its wall-clock cap");
            return TrialResult {
                game: game.name.clone(),
                map_seed: map.map_seed.clone(),
                player_id: player_id.to_string(),
                events: Vec::new(),
                rounds: Vec::new(),
                headline_score: 0.0,
                status: TrialStatus::Cancelled,
                error: Some(TrialError::from(&err)),
                started_at,
                finished_at: Utc::now().to_rfc3339(),
            };
        }
    };

    let status = match &error {
        Some(_) => TrialStatus::Errored,
        None if !rounds.is_empty() && rounds.iter().all(|r| r.stuck) => TrialStatus::Stuck,
        None => TrialStatus::Ok,
    };
    let headline = headline_score(&rounds);

    info!(
        game = %game.name,
        player_id,
        map_seed = %map.map_seed,
        ?status,
        headline,
        rounds = rounds.len(),
        "Trial finished"
    );

    TrialResult {
        game: game.name.clone(),
        map_seed: map.map_seed.clone(),
        player_id: player_id.to_string(),
        events,
        rounds,
        headline_score: headline,
        status,
        error: error.as_ref().map(TrialError::from),
        started_at,
        finished_at: Utc::now().to_rfc3339(),
    }
}

/// The round loop. Returns whatever events and round records were
/// produced, plus the error that stopped the trial early, if any.
async fn drive(
    game: &Game,
    map: &GameMap,
    player_id: &str,
    player: Arc<dyn Player>,
    gateway: &JudgeGateway,
    params: &TrialParams,
) -> (Vec<Event>, Vec<RoundSummary>, Option<XentError>) {
    let mut interp = Interpreter::new(Arc::clone(&game.program), map.bindings.clone())
        .with_ensure_retry_cap(params.ensure_retry_cap);
    let mut adapter = PlayerAdapter::new(
        player,
        Arc::clone(&game.presenter),
        params.request_params.clone(),
    );

    let mut rounds = Vec::new();
    let mut error = None;

    for round_index in 0..params.max_rounds {
        let metadata = GameMetadata {
            game: game.name.clone(),
            player_id: player_id.to_string(),
            round_index,
            max_rounds: params.max_rounds,
        };
        match interp.run_round(gateway, &mut adapter, &metadata).await {
            Ok(record) => rounds.push(RoundSummary::from(&record)),
            Err(err) => {
                error = Some(err);
                break;
            }
        }
    }

    (interp.into_events(), rounds, error)
}

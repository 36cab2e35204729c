// Player adapter — couples the interpreter's elicit to a back-end.
//
// On each elicit the adapter presents the unseen tail of the event log
// through the game's presentation function, calls the back-end with the
// resulting transcript, and extracts the last <move>...</move> fragment.
// Back-end retries live here, not in the interpreter; the presentation
// function is untrusted and any failure in it is promoted to
// PlayerUnavailable because the trial cannot proceed without a prompt.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use regex_lite::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, XentError};
use crate::game::events::Event;
use crate::output::truncate_chars;

use super::presentation::{GameMetadata, Presenter};
use super::traits::{ChatMessage, Player, RequestParams};

/// Maximum back-end attempts per elicit.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff between attempts.
const BASE_BACKOFF: Duration = Duration::from_millis(500);

pub struct PlayerAdapter {
    player: Arc<dyn Player>,
    presenter: Arc<dyn Presenter>,
    params: RequestParams,
    /// Index into the trial event log: everything before it has already
    /// been presented to this player.
    cursor: usize,
    /// Opaque presentation context threaded through the trial.
    ctx: Value,
}

impl PlayerAdapter {
    pub fn new(player: Arc<dyn Player>, presenter: Arc<dyn Presenter>, params: RequestParams) -> Self {
        Self {
            player,
            presenter,
            params,
            cursor: 0,
            ctx: Value::Null,
        }
    }

    /// Rollback discarded events past `events_len`; anything re-emitted
    /// at those positions has not been presented yet.
    pub fn note_rollback(&mut self, events_len: usize) {
        self.cursor = self.cursor.min(events_len);
    }

    /// Produce the player's next move given the trial event log. The
    /// returned move is raw; the interpreter truncates it to the elicit's
    /// token budget under the judge's tokenizer.
    pub async fn next_move(
        &mut self,
        events: &[Event],
        registers: &std::collections::BTreeMap<String, String>,
        metadata: &GameMetadata,
    ) -> Result<String> {
        // Rollback may have discarded events past the cursor.
        self.cursor = self.cursor.min(events.len());
        let since = &events[self.cursor..];

        let presenter = Arc::clone(&self.presenter);
        let presented = catch_unwind(AssertUnwindSafe(|| {
            presenter.present(registers, since, metadata, events, self.ctx.clone())
        }))
        .map_err(|_| XentError::Presentation("presentation function panicked".to_string()))?;

        let (transcript, new_ctx) = match presented {
            Ok(ok) => ok,
            Err(err) => return Err(promote(err)),
        };
        if transcript.is_empty() {
            return Err(promote(XentError::Presentation(
                "presentation produced an empty transcript".to_string(),
            )));
        }
        self.cursor = events.len();
        self.ctx = new_ctx;

        let response = self.complete_with_retry(&transcript).await?;
        let game_move = extract_move(&response);
        debug!(
            player = %metadata.player_id,
            response_chars = response.len(),
            game_move = %truncate_chars(&game_move, 50),
            "Move extracted"
        );
        Ok(game_move)
    }

    async fn complete_with_retry(&self, transcript: &[ChatMessage]) -> Result<String> {
        let budget = self.params.response_budget();
        let mut attempt = 0u32;
        loop {
            match self.player.complete(transcript, budget, &self.params).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let backoff = BASE_BACKOFF.saturating_mul(1u32 << attempt);
                    warn!(
                        attempt,
                        max_retries = MAX_RETRIES,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Player call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(XentError::PlayerUnavailable(msg)) => {
                    return Err(XentError::PlayerUnavailable(format!(
                        "gave up after {attempt} retries: {msg}"
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Presentation failures become PlayerUnavailable: without a prompt the
/// trial cannot continue.
fn promote(err: XentError) -> XentError {
    match err {
        XentError::Presentation(msg) => XentError::PlayerUnavailable(format!("presentation: {msg}")),
        other => other,
    }
}

/// Extract the last `<move>...</move>` fragment from a back-end response.
/// Missing or malformed markup yields the empty string (a zero-length
/// move, which typically fails the game's ensure).
pub fn extract_move(response: &str) -> String {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<move>(.*?)</move>").expect("move pattern compiles")
    });

    re.captures_iter(response)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

// Presentation functions — how the event log becomes a chat prompt.
//
// The presentation function is part of the *game*, not the player: it
// defines the information set by rendering events (and nothing else) into
// a transcript. Games select a presenter by name; DefaultPresenter is the
// production renderer with `<move>` extraction instructions.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Result, XentError};
use crate::game::events::Event;

use super::traits::ChatMessage;

/// Trial-level metadata handed to presentation functions.
#[derive(Debug, Clone)]
pub struct GameMetadata {
    pub game: String,
    pub player_id: String,
    pub round_index: u32,
    pub max_rounds: u32,
}

/// A presentation function. Receives the register snapshot from the
/// pending elicit, the not-yet-presented tail of the event log, trial
/// metadata, the full history, and an opaque context value threaded
/// through the trial. Returns a non-empty transcript plus the new context.
pub trait Presenter: Send + Sync {
    fn present(
        &self,
        registers: &BTreeMap<String, String>,
        since_events: &[Event],
        metadata: &GameMetadata,
        full_history: &[Event],
        ctx: Value,
    ) -> Result<(Vec<ChatMessage>, Value)>;
}

/// Look up a presenter by the name given in the game spec.
pub fn presenter_by_name(name: &str) -> Result<Arc<dyn Presenter>> {
    match name {
        "default" => Ok(Arc::new(DefaultPresenter)),
        other => Err(XentError::Config(format!("unknown presentation `{other}`"))),
    }
}

/// The production presenter: a system preamble on first contact, then one
/// user message per unseen event, ending with the move instruction.
pub struct DefaultPresenter;

impl Presenter for DefaultPresenter {
    fn present(
        &self,
        _registers: &BTreeMap<String, String>,
        since_events: &[Event],
        metadata: &GameMetadata,
        _full_history: &[Event],
        ctx: Value,
    ) -> Result<(Vec<ChatMessage>, Value)> {
        let primed = ctx.get("primed").and_then(Value::as_bool).unwrap_or(false);

        let mut transcript = Vec::new();
        if !primed {
            transcript.push(ChatMessage::system(format!(
                "You are playing `{}`, a text game scored by a language model's \
                 cross-entropy. You will be asked for moves; higher rewards are \
                 better. The game runs for up to {} rounds. Always answer with \
                 your move wrapped in <move></move> tags.",
                metadata.game, metadata.max_rounds
            )));
        }

        for event in since_events {
            if let Some(message) = render_event(event) {
                transcript.push(message);
            }
        }

        if transcript.is_empty() {
            // Nothing new to show; still give the model something to answer.
            transcript.push(ChatMessage::user(
                "Provide your next move in <move></move> tags.".to_string(),
            ));
        }

        Ok((transcript, json!({ "primed": true })))
    }
}

fn render_event(event: &Event) -> Option<ChatMessage> {
    match event {
        Event::RoundStarted { round_index, .. } => {
            Some(ChatMessage::user(format!("Round {} begins.", round_index + 1)))
        }
        Event::RoundFinished { round_index, .. } => {
            Some(ChatMessage::user(format!("Round {} is over.", round_index + 1)))
        }
        Event::Reveal { values, .. } => {
            let mut out = String::from("Revealed:\n");
            for (name, value) in values {
                out.push_str(&format!("  {name} = {value}\n"));
            }
            Some(ChatMessage::user(out))
        }
        Event::Reward { value, .. } => Some(ChatMessage::user(format!(
            "Reward: {:.3} bits over {} tokens.",
            value.total(),
            value.len()
        ))),
        Event::FailedEnsure { ensure_results, .. } => Some(ChatMessage::user(format!(
            "Your move failed validation ({} of {} checks passed); play resumed \
             from the last checkpoint. Try something different.",
            ensure_results.iter().filter(|b| **b).count(),
            ensure_results.len()
        ))),
        Event::ElicitRequest { var, max_tokens, .. } => Some(ChatMessage::user(format!(
            "Provide a value for `{var}` (at most {max_tokens} tokens). Reply \
             with <move>your text</move>."
        ))),
        // The player's own earlier moves come back as its side of the chat.
        Event::ElicitResponse { response_text, .. } => Some(ChatMessage::assistant(format!(
            "<move>{response_text}</move>"
        ))),
    }
}

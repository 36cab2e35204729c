// Scripted player — canned responses in order.
//
// Used by the integration tests and for deterministic replays. Once the
// script runs out it keeps returning the last configured fallback (empty
// by default), which downstream turns into an empty move.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;

use super::traits::{ChatMessage, Player, RequestParams};

pub struct ScriptedPlayer {
    responses: Mutex<std::vec::IntoIter<String>>,
    fallback: String,
}

impl ScriptedPlayer {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter()),
            fallback: String::new(),
        }
    }

    /// Wrap each move in `<move>` tags, the shape a well-behaved LLM
    /// player produces.
    pub fn with_moves(moves: &[&str]) -> Self {
        Self::new(
            moves
                .iter()
                .map(|m| format!("I will play this.\n<move>{m}</move>"))
                .collect(),
        )
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }
}

#[async_trait]
impl Player for ScriptedPlayer {
    async fn complete(
        &self,
        _transcript: &[ChatMessage],
        _max_tokens: u32,
        _params: &RequestParams,
    ) -> Result<String> {
        let mut responses = self.responses.lock().expect("script lock");
        Ok(responses.next().unwrap_or_else(|| self.fallback.clone()))
    }
}

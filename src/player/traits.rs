// Player capability — the move-producing back-end abstraction.
//
// A Player receives a chat transcript (built by the game's presentation
// function) and returns raw response text; the adapter extracts the move
// from it. Implementations: LlmPlayer (remote chat API), HumanPlayer
// (live channel), ScriptedPlayer (canned moves for tests and replays).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Provider-specific request parameters, passed through from the player
/// spec in the benchmark configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestParams {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Per-call timeout in seconds (default 120).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Completion budget for the back-end response (default 1024). This
    /// bounds the player's *reply*, not the move itself — moves are
    /// truncated separately under the judge's tokenizer.
    #[serde(default)]
    pub response_max_tokens: Option<u32>,
}

impl RequestParams {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs.unwrap_or(120))
    }

    pub fn response_budget(&self) -> u32 {
        self.response_max_tokens.unwrap_or(1024)
    }
}

/// Trait for move-producing back-ends. `max_tokens` is the completion
/// budget for the response text.
#[async_trait]
pub trait Player: Send + Sync {
    async fn complete(
        &self,
        transcript: &[ChatMessage],
        max_tokens: u32,
        params: &RequestParams,
    ) -> Result<String>;
}

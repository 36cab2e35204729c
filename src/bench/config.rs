// Benchmark configuration — the condensed form and its expansion.
//
// A condensed config names games, players and an expansion policy; the
// scheduler expands it into the cartesian product of games × map seeds ×
// players. Map seeds derive deterministically from the master seed so two
// runs of the same config expand to the same trial identities.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, XentError};
use crate::player::human::HumanPlayer;
use crate::player::llm::{LlmPlayer, Provider};
use crate::player::traits::{Player, RequestParams};
use crate::trial::map::StorySource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub metadata: Metadata,
    pub expansion: ExpansionConfig,
    pub players: Vec<PlayerSpec>,
    pub games: Vec<GameSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub benchmark_id: String,
    /// Identifier of the judge model (recorded in aggregates; the judge
    /// itself is loaded by the binary).
    pub judge_model: String,
    pub num_rounds_per_game: u32,
    /// Master seed all map seeds derive from.
    pub seed: u64,
    /// Wall-clock cap per trial, in seconds.
    #[serde(default = "default_trial_timeout")]
    pub trial_timeout_secs: u64,
}

fn default_trial_timeout() -> u64 {
    600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoryGenerator {
    Judge,
    CommunityArchive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    pub num_maps_per_game: u32,
    pub story_generator: StoryGenerator,
    /// Token budget for map stories.
    pub max_story_tokens: u32,
}

impl ExpansionConfig {
    pub fn story_source(&self) -> StorySource {
        match self.story_generator {
            StoryGenerator::Judge => StorySource::Judge { max_tokens: self.max_story_tokens },
            StoryGenerator::CommunityArchive => {
                StorySource::community_default(self.max_story_tokens)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerType {
    Llm,
    Human,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub player_type: PlayerType,
    #[serde(default)]
    pub options: PlayerOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerOptions {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,
    #[serde(default)]
    pub request_params: RequestParams,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            base_url: None,
            api_key_env: None,
            requests_per_second: default_rps(),
            request_params: RequestParams::default(),
        }
    }
}

fn default_rps() -> f64 {
    1.0
}

impl PlayerSpec {
    /// Build the back-end for this spec. One back-end instance per spec
    /// is built and shared across all of the player's trials, so the
    /// HTTP client and rate-limit bucket are shared too.
    pub fn build(&self) -> Result<Arc<dyn Player>> {
        match self.player_type {
            PlayerType::Llm => {
                let provider = self.options.provider.ok_or_else(|| {
                    XentError::Config(format!("player `{}` has no provider", self.id))
                })?;
                let model = self.options.model.clone().ok_or_else(|| {
                    XentError::Config(format!("player `{}` has no model", self.id))
                })?;
                let player = LlmPlayer::new(
                    provider,
                    model,
                    self.options.base_url.clone(),
                    self.options.api_key_env.as_deref(),
                    self.options.requests_per_second,
                )?;
                Ok(Arc::new(player))
            }
            PlayerType::Human => Ok(Arc::new(HumanPlayer::from_stdin())),
        }
    }
}

/// Build every configured player's back-end, keyed by player id. This is
/// the production wiring for `scheduler::run_benchmark`.
pub fn build_players(config: &BenchmarkConfig) -> Result<Vec<(String, Arc<dyn Player>)>> {
    config
        .players
        .iter()
        .map(|spec| Ok((spec.id.clone(), spec.build()?)))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSpec {
    pub name: String,
    /// XDL source text.
    pub source: String,
    /// Presentation function, by registry name.
    #[serde(default = "default_presentation")]
    pub presentation: String,
}

fn default_presentation() -> String {
    "default".to_string()
}

impl BenchmarkConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&body)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the scheduler cannot expand. Config errors
    /// abort scheduling before any trial runs.
    pub fn validate(&self) -> Result<()> {
        if self.games.is_empty() {
            return Err(XentError::Config("no games configured".to_string()));
        }
        if self.players.is_empty() {
            return Err(XentError::Config("no players configured".to_string()));
        }
        if self.expansion.num_maps_per_game == 0 {
            return Err(XentError::Config("num_maps_per_game must be positive".to_string()));
        }
        if self.metadata.num_rounds_per_game == 0 {
            return Err(XentError::Config("num_rounds_per_game must be positive".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for player in &self.players {
            if !seen.insert(&player.id) {
                return Err(XentError::Config(format!("duplicate player id `{}`", player.id)));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for game in &self.games {
            if !seen.insert(&game.name) {
                return Err(XentError::Config(format!("duplicate game name `{}`", game.name)));
            }
        }
        Ok(())
    }

    /// The deterministic map seeds for one game.
    pub fn map_seeds(&self, game: &str) -> Vec<String> {
        (0..self.expansion.num_maps_per_game)
            .map(|i| derive_map_seed(self.metadata.seed, game, i))
            .collect()
    }
}

/// A map seed is the hex prefix of SHA-256 over (master seed, game,
/// index) — stable across runs and platforms.
fn derive_map_seed(master_seed: u64, game: &str, index: u32) -> String {
    let digest = Sha256::digest(format!("{master_seed}:{game}:{index}").as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

// Maps — precomputed game openings shared across players.
//
// A map binds one (game, map seed) pair to a story and to the resolved
// leading `assign` prefix of the program, so every player of that map
// sees the same problem instance. Maps are memoised as JSON files next to
// the trial results; re-runs and concurrent players load instead of
// resampling.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Result, XentError};
use crate::game::registers::RegisterFile;
use crate::judge::gateway::JudgeGateway;
use crate::judge::traits::GenerateOptions;
use crate::xdl::ast::{Op, Program};
use crate::xdl::eval::{eval, Env, Value};

use super::result::{read_json_lenient, write_json_atomic};

/// Prompt used when the judge model itself writes the story.
const STORY_PROMPT: &str = "Tell me a short story.\n\n";

/// Fallback openings for the community-archive story source. All public
/// domain.
const COMMUNITY_ARCHIVE: [&str; 6] = [
    "It is a truth universally acknowledged, that a single man in \
     possession of a good fortune, must be in want of a wife.",
    "Call me Ishmael. Some years ago, never mind how long precisely, \
     having little or no money in my purse, I thought I would sail about \
     a little and see the watery part of the world.",
    "It was the best of times, it was the worst of times, it was the age \
     of wisdom, it was the age of foolishness.",
    "All happy families are alike; each unhappy family is unhappy in its \
     own way.",
    "In the beginning the Universe was created. A long time ago, a brave \
     knight set out from a small village carrying nothing but a rusted \
     sword and a letter he could not read.",
    "The sun rose over the harbor while the fishermen hauled their nets, \
     and nobody noticed the ship with black sails anchored past the \
     breakwater.",
];

/// Where map stories come from.
#[derive(Debug, Clone)]
pub enum StorySource {
    /// Seeded sampling from the judge model.
    Judge { max_tokens: u32 },
    /// Deterministic draw from a fixed text archive.
    Archive { stories: Vec<String>, max_tokens: u32 },
}

impl StorySource {
    /// The built-in archive.
    pub fn community_default(max_tokens: u32) -> Self {
        Self::Archive {
            stories: COMMUNITY_ARCHIVE.iter().map(|s| s.to_string()).collect(),
            max_tokens,
        }
    }
}

/// A resolved map: the story plus the register bindings of the program's
/// assign prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMap {
    pub game: String,
    pub map_seed: String,
    pub story: String,
    pub bindings: Vec<(String, String)>,
}

/// Derive a u64 RNG seed from a map seed string.
pub fn seed_to_u64(seed: &str) -> u64 {
    let digest = Sha256::digest(seed.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().expect("8 digest bytes"))
}

/// Load a memoised map or build and persist it.
pub async fn load_or_build(
    maps_dir: &Path,
    game: &str,
    program: &Program,
    map_seed: &str,
    gateway: &JudgeGateway,
    source: &StorySource,
) -> Result<GameMap> {
    let path = maps_dir.join(format!("map_{game}_{map_seed}.json"));
    if let Some(map) = read_json_lenient::<GameMap>(&path) {
        debug!(game, map_seed, "Loaded memoised map");
        return Ok(map);
    }

    let map = build(game, program, map_seed, gateway, source).await?;
    write_json_atomic(&path, &map)?;
    info!(game, map_seed, story_chars = map.story.len(), "Built map");
    Ok(map)
}

/// Build a map: resolve the story, then run the assign prefix with
/// `story()` bound to it.
pub async fn build(
    game: &str,
    program: &Program,
    map_seed: &str,
    gateway: &JudgeGateway,
    source: &StorySource,
) -> Result<GameMap> {
    let seed = seed_to_u64(map_seed);
    let story = match source {
        StorySource::Judge { max_tokens } => {
            gateway
                .generate(STORY_PROMPT, *max_tokens, seed, &GenerateOptions::default())
                .await?
        }
        StorySource::Archive { stories, max_tokens } => {
            if stories.is_empty() {
                return Err(XentError::Config("story archive is empty".to_string()));
            }
            let pick = &stories[(seed % stories.len() as u64) as usize];
            gateway.truncate(pick, *max_tokens).await?
        }
    };

    let mut registers = RegisterFile::new();
    for op in &program.ops[..program.map_prefix_len()] {
        let Op::Assign { line, name, expr } = op else {
            unreachable!("map prefix contains only assigns");
        };
        let env = Env {
            registers: registers.values(),
            judge: gateway,
            story: Some(&story),
        };
        let value = match eval(expr, *line, &env).await? {
            Value::Str(s) => s,
            other => {
                return Err(XentError::Expr {
                    line: *line,
                    message: format!("map prefix assign must produce text, got {other:?}"),
                })
            }
        };
        registers.set(name, value);
    }

    let bindings: Vec<(String, String)> = registers
        .values()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(GameMap {
        game: game.to_string(),
        map_seed: map_seed.to_string(),
        story,
        bindings,
    })
}

// Trial results — the on-disk record of one (game, map, player) run.
//
// Result files are the only cross-process rendezvous: their presence (and
// parseability) means "done" to the scheduler, so they are always written
// via a temp file and an atomic rename, and they are written even for
// failed trials so a benchmark can be inspected and resumed.

use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Result, XentError};
use crate::game::events::Event;
use crate::game::machine::RoundRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialStatus {
    Ok,
    Errored,
    Cancelled,
    Stuck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialError {
    pub kind: String,
    pub message: String,
}

impl From<&XentError> for TrialError {
    fn from(err: &XentError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Per-round bookkeeping as serialised in the result file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub index: u32,
    pub score: f64,
    pub arms: u32,
    pub iterations: u32,
    #[serde(default)]
    pub stuck: bool,
}

impl From<&RoundRecord> for RoundSummary {
    fn from(record: &RoundRecord) -> Self {
        Self {
            index: record.index,
            score: record.score,
            arms: record.arms,
            iterations: record.iterations,
            stuck: record.stuck,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub game: String,
    pub map_seed: String,
    pub player_id: String,
    pub events: Vec<Event>,
    pub rounds: Vec<RoundSummary>,
    pub headline_score: f64,
    pub status: TrialStatus,
    pub error: Option<TrialError>,
    pub started_at: String,
    pub finished_at: String,
}

/// The headline score: the maximum round total, ties broken by the
/// earliest round (strict `>` keeps the first achiever).
pub fn headline_score(rounds: &[RoundSummary]) -> f64 {
    let mut best = 0.0f64;
    let mut seen = false;
    for round in rounds {
        if !seen || round.score > best {
            best = round.score;
            seen = true;
        }
    }
    if seen {
        best
    } else {
        0.0
    }
}

/// Write a JSON document atomically: temp file in the same directory,
/// then rename over the target.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        XentError::Config(format!("result path has no parent: {}", path.display()))
    })?;
    std::fs::create_dir_all(parent)?;

    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a JSON document, returning None when the file is missing or does
/// not parse (a partial write from a crashed run counts as "not done").
pub fn read_json_lenient<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let body = std::fs::read(path).ok()?;
    serde_json::from_slice(&body).ok()
}

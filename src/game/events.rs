// Trial events — the append-only record of game execution.
//
// Events are the only thing a player ever observes: the presentation
// function receives them and nothing else, so every payload here is part
// of the player-visible information set. elicit_request snapshots the
// register file so presentation functions stay pure with respect to
// interpreter internals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::score::TokenXent;

/// One event in a trial's log. `line_num` is the 1-based source line of
/// the emitting op (0 for control events with no single source op).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RoundStarted {
        line_num: u32,
        round_index: u32,
    },
    ElicitRequest {
        line_num: u32,
        var: String,
        max_tokens: u32,
        registers: BTreeMap<String, String>,
    },
    ElicitResponse {
        line_num: u32,
        var: String,
        response_text: String,
    },
    Reveal {
        line_num: u32,
        /// Name/value pairs in reveal order.
        values: Vec<(String, String)>,
    },
    Reward {
        line_num: u32,
        value: TokenXent,
    },
    FailedEnsure {
        line_num: u32,
        /// Source line of the beacon rolled back to (0 = round start).
        beacon_line: u32,
        /// Per-predicate outcomes of the failing ensure.
        ensure_results: Vec<bool>,
    },
    RoundFinished {
        line_num: u32,
        round_index: u32,
    },
}

impl Event {
    pub fn line_num(&self) -> u32 {
        match self {
            Event::RoundStarted { line_num, .. }
            | Event::ElicitRequest { line_num, .. }
            | Event::ElicitResponse { line_num, .. }
            | Event::Reveal { line_num, .. }
            | Event::Reward { line_num, .. }
            | Event::FailedEnsure { line_num, .. }
            | Event::RoundFinished { line_num, .. } => *line_num,
        }
    }
}

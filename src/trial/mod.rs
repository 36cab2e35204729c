// Trials — one (game, map, player) run and its persisted record.

pub mod map;
pub mod orchestrator;
pub mod result;

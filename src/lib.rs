// xentbench: a benchmark harness for adversarial cross-entropy games.
//
// This is the library root. Each module corresponds to a major subsystem
// of the game runtime and the benchmark scheduler built on top of it.

pub mod bench;
pub mod error;
pub mod game;
pub mod judge;
pub mod output;
pub mod player;
pub mod score;
pub mod trial;
pub mod xdl;

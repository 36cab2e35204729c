// Players — trait-based abstraction over move-producing back-ends.
//
// The Player trait defines the capability. LlmPlayer talks to remote chat
// APIs, HumanPlayer reads from a live channel, ScriptedPlayer replays
// canned moves. PlayerAdapter is the production wrapper that owns
// presentation, move extraction and retry.

pub mod adapter;
pub mod human;
pub mod llm;
pub mod presentation;
pub mod rate_limiter;
pub mod scripted;
pub mod traits;

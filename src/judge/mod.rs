// Judge — tokenization and cross-entropy scoring.
//
// The Judge trait defines the capability; LocalJudge is the default
// back-end (ONNX causal LM, no network dependency). JudgeGateway is the
// process-wide wrapper every other component goes through: it owns retry
// policy and the token-alignment checks, and it is the only place in the
// crate that knows about tokenization.

pub mod download;
pub mod gateway;
pub mod local;
pub mod traits;

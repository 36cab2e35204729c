// Error taxonomy for the harness.
//
// Retriable failures (judge or player back-end hiccups) are retried inside
// the gateway/adapter that owns the back-end; everything that escapes here
// is either round-level (EnsureExceeded), trial-level (most variants), or
// benchmark-level (Config). Trial-level errors end up in the persisted
// trial result as a (kind, message) pair so failed benchmarks can still be
// inspected and resumed.

use thiserror::Error;

/// All error types that can occur while running games and benchmarks.
#[derive(Debug, Error)]
pub enum XentError {
    /// Bad XDL source. Fatal for the whole game: every trial of the game
    /// is persisted as errored.
    #[error("parse error at line {line}: {message}")]
    Parse { line: u32, message: String },

    /// Judge back-end failure that survived the retry budget.
    #[error("judge unavailable: {0}")]
    JudgeUnavailable(String),

    /// The judge produced inconsistent tokenizations for the same text.
    /// Never retried; a scoring result built on drifting token boundaries
    /// would be meaningless.
    #[error("scoring alignment error: {0}")]
    ScoringAlignment(String),

    /// Player back-end failure that survived the retry budget.
    #[error("player unavailable: {0}")]
    PlayerUnavailable(String),

    /// The presentation function failed to produce a transcript.
    #[error("presentation error: {0}")]
    Presentation(String),

    /// An ensure predicate kept failing past the per-call-site retry cap.
    /// Round-level: the round is marked stuck, the trial moves on.
    #[error("ensure retry cap exceeded at line {line}")]
    EnsureExceeded { line: u32 },

    /// The trial ran past its wall-clock cap and was cancelled.
    #[error("trial timed out after {seconds}s")]
    TrialTimeout { seconds: u64 },

    /// Non-retriable failure while evaluating an XDL expression.
    #[error("expression error at line {line}: {message}")]
    Expr { line: u32, message: String },

    /// Bad benchmark configuration. Aborts scheduling before any trial runs.
    #[error("config error: {0}")]
    Config(String),

    /// IO error (results directory, model files, map cache).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl XentError {
    /// Whether the retry loops in the judge gateway / player adapter may
    /// try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            XentError::JudgeUnavailable(_) | XentError::PlayerUnavailable(_)
        )
    }

    /// Short machine-readable kind, stored in trial result files.
    pub fn kind(&self) -> &'static str {
        match self {
            XentError::Parse { .. } => "parse",
            XentError::JudgeUnavailable(_) => "judge_unavailable",
            XentError::ScoringAlignment(_) => "scoring_alignment",
            XentError::PlayerUnavailable(_) => "player_unavailable",
            XentError::Presentation(_) => "presentation",
            XentError::EnsureExceeded { .. } => "ensure_exceeded",
            XentError::TrialTimeout { .. } => "trial_timeout",
            XentError::Expr { .. } => "expr",
            XentError::Config(_) => "config",
            XentError::Io(_) => "io",
            XentError::Json(_) => "json",
        }
    }
}

/// Result type alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, XentError>;

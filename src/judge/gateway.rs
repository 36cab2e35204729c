// Judge gateway — the process-wide scoring front door.
//
// Wraps an `Arc<dyn Judge>` with retry/backoff on transient back-end
// failures and with the token-alignment checks that turn raw scored
// tokens into TokenXent reward values. The gateway outlives all trials
// and is shared by every concurrent interpreter; callers never hold locks
// across its calls.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, XentError};
use crate::score::TokenXent;

use super::traits::{GenerateOptions, Judge, Tokenization};

/// Retry policy for transient judge failures (timeouts, OOM, 5xx-class
/// errors from remote back-ends).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No retries, no waiting. Used by tests that probe failure paths.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Exponential backoff with jitter for the given attempt (1-based).
    /// The nanosecond clock provides enough spread to avoid lockstep
    /// retries across concurrent trials.
    fn backoff(&self, attempt: u32) -> Duration {
        let backoff = self
            .base_backoff
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_backoff);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let jitter_factor = 0.75 + (nanos % 500) as f64 / 1000.0; // 0.75 to 1.25
        Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor)
    }
}

/// Shared scoring front door. Cloning is cheap; all clones share the same
/// judge back-end.
#[derive(Clone)]
pub struct JudgeGateway {
    judge: Arc<dyn Judge>,
    retry: RetryPolicy,
}

impl JudgeGateway {
    pub fn new(judge: Arc<dyn Judge>, retry: RetryPolicy) -> Self {
        Self { judge, retry }
    }

    /// Tokenize a text under the judge model.
    pub async fn tokenize(&self, text: &str) -> Result<Tokenization> {
        self.with_retry("tokenize", || self.judge.tokenize(text)).await
    }

    /// Per-token cross-entropy of `text` given `context`, as a TokenXent.
    pub async fn score(&self, text: &str, context: &str) -> Result<TokenXent> {
        let scored = self
            .with_retry("xent", || self.judge.xent(text, context))
            .await?;
        Ok(TokenXent::new(
            scored.into_iter().map(|t| (t.surface, t.xent)).collect(),
        ))
    }

    /// Token-aligned difference `xent(text|ctx_a) - xent(text|ctx_b)`.
    ///
    /// Both runs must tokenize `text` identically; alignment is checked by
    /// exact token-id equality. Drift is a bug or model nondeterminism and
    /// is never resized away.
    pub async fn score_diff(&self, text: &str, ctx_a: &str, ctx_b: &str) -> Result<TokenXent> {
        let requests = vec![
            (text.to_string(), ctx_a.to_string()),
            (text.to_string(), ctx_b.to_string()),
        ];
        let mut results = self
            .with_retry("xent_batch", || self.judge.xent_batch(&requests))
            .await?;
        if results.len() != 2 {
            return Err(XentError::JudgeUnavailable(format!(
                "batch returned {} results for 2 requests",
                results.len()
            )));
        }
        let under_b = results.pop().unwrap_or_default();
        let under_a = results.pop().unwrap_or_default();

        if under_a.len() != under_b.len() {
            return Err(XentError::ScoringAlignment(format!(
                "tokenizations differ in length: {} vs {} tokens",
                under_a.len(),
                under_b.len()
            )));
        }

        let mut pairs = Vec::with_capacity(under_a.len());
        for (i, (a, b)) in under_a.iter().zip(under_b.iter()).enumerate() {
            if a.id != b.id {
                return Err(XentError::ScoringAlignment(format!(
                    "token {} differs between contexts: id {} vs id {}",
                    i, a.id, b.id
                )));
            }
            pairs.push((a.surface.clone(), a.xent - b.xent));
        }
        Ok(TokenXent::new(pairs))
    }

    /// Seeded sampling for map stories.
    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        seed: u64,
        options: &GenerateOptions,
    ) -> Result<String> {
        self.with_retry("generate", || {
            self.judge.generate(prompt, max_tokens, seed, options)
        })
        .await
    }

    /// Truncate `text` to at most `max_tokens` tokens under the judge's
    /// tokenizer, at a token boundary.
    pub async fn truncate(&self, text: &str, max_tokens: u32) -> Result<String> {
        if max_tokens == 0 || text.is_empty() {
            return Ok(String::new());
        }
        let tokens = self.tokenize(text).await?;
        if tokens.len() <= max_tokens as usize {
            return Ok(text.to_string());
        }
        Ok(tokens.surfaces[..max_tokens as usize].concat())
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        what,
                        attempt,
                        max_retries = self.retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Judge call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

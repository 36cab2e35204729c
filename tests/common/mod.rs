// Shared test doubles: a deterministic in-process judge and helpers.
//
// The fake judge tokenizes at word boundaries (whitespace attaches to the
// following word, so surface concatenation reproduces the text exactly)
// and derives pseudo cross-entropies from a hash of (conditioning prefix,
// token). Because a token's value depends only on the text that precedes
// it, the additivity law holds exactly for word-aligned concatenations.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use xentbench::error::{Result, XentError};
use xentbench::judge::gateway::{JudgeGateway, RetryPolicy};
use xentbench::judge::traits::{GenerateOptions, Judge, ScoredToken, Tokenization};

const BOS: &str = "<bos>";

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Split at word boundaries, whitespace attached to the following word:
/// "Once upon a" -> ["Once", " upon", " a"].
pub fn split_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_non_ws = false;

    for c in text.chars() {
        if c.is_whitespace() && prev_non_ws && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_non_ws = !c.is_whitespace();
        current.push(c);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Pseudo cross-entropy of `token` given the conditioning text before it.
fn xent_value(prefix: &str, token: &str) -> f64 {
    let mut key = Vec::with_capacity(prefix.len() + token.len() + 1);
    key.extend_from_slice(prefix.as_bytes());
    key.push(0);
    key.extend_from_slice(token.as_bytes());
    (fnv1a(&key) % 4096) as f64 / 512.0
}

pub struct FakeJudge {
    vocab: Mutex<(HashMap<String, u32>, u32)>,
}

impl FakeJudge {
    pub fn new() -> Self {
        Self { vocab: Mutex::new((HashMap::new(), 0)) }
    }

    fn id_of(&self, surface: &str) -> u32 {
        let mut vocab = self.vocab.lock().expect("vocab lock");
        if let Some(id) = vocab.0.get(surface) {
            return *id;
        }
        let id = vocab.1;
        vocab.1 += 1;
        vocab.0.insert(surface.to_string(), id);
        id
    }

    fn score(&self, text: &str, context: &str) -> Vec<ScoredToken> {
        let base = if context.is_empty() { BOS.to_string() } else { context.to_string() };
        let mut prefix = base;
        split_tokens(text)
            .into_iter()
            .map(|surface| {
                let xent = xent_value(&prefix, &surface);
                prefix.push_str(&surface);
                ScoredToken { id: self.id_of(&surface), surface, xent }
            })
            .collect()
    }
}

#[async_trait]
impl Judge for FakeJudge {
    async fn tokenize(&self, text: &str) -> Result<Tokenization> {
        let surfaces = split_tokens(text);
        let ids = surfaces.iter().map(|s| self.id_of(s)).collect();
        Ok(Tokenization { ids, surfaces })
    }

    async fn xent(&self, text: &str, context: &str) -> Result<Vec<ScoredToken>> {
        Ok(self.score(text, context))
    }

    async fn generate(
        &self,
        _prompt: &str,
        max_tokens: u32,
        seed: u64,
        _options: &GenerateOptions,
    ) -> Result<String> {
        const WORDS: [&str; 10] = [
            "once", "upon", "a", "time", "there", "was", "brave", "knight", "dragon", "castle",
        ];
        let mut state = seed;
        let mut words = Vec::new();
        for _ in 0..max_tokens.min(32) {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            words.push(WORDS[((state >> 33) % WORDS.len() as u64) as usize]);
        }
        Ok(words.join(" "))
    }
}

/// A judge whose token ids drift between scoring calls on identical
/// input, simulating tokenizer nondeterminism.
pub struct DriftingJudge {
    inner: FakeJudge,
    calls: AtomicU32,
}

impl DriftingJudge {
    pub fn new() -> Self {
        Self { inner: FakeJudge::new(), calls: AtomicU32::new(0) }
    }
}

#[async_trait]
impl Judge for DriftingJudge {
    async fn tokenize(&self, text: &str) -> Result<Tokenization> {
        self.inner.tokenize(text).await
    }

    async fn xent(&self, text: &str, context: &str) -> Result<Vec<ScoredToken>> {
        let drift = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scored = self.inner.score(text, context);
        for token in &mut scored {
            token.id += drift * 10_000;
        }
        Ok(scored)
    }

    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        seed: u64,
        options: &GenerateOptions,
    ) -> Result<String> {
        self.inner.generate(prompt, max_tokens, seed, options).await
    }
}

/// A judge that fails its first `failures` scoring calls with a
/// retriable error, then behaves like FakeJudge.
pub struct FlakyJudge {
    inner: FakeJudge,
    remaining_failures: AtomicU32,
}

impl FlakyJudge {
    pub fn new(failures: u32) -> Self {
        Self { inner: FakeJudge::new(), remaining_failures: AtomicU32::new(failures) }
    }

    fn maybe_fail(&self) -> Result<()> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(XentError::JudgeUnavailable("simulated timeout".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Judge for FlakyJudge {
    async fn tokenize(&self, text: &str) -> Result<Tokenization> {
        self.inner.tokenize(text).await
    }

    async fn xent(&self, text: &str, context: &str) -> Result<Vec<ScoredToken>> {
        self.maybe_fail()?;
        self.inner.xent(text, context).await
    }

    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        seed: u64,
        options: &GenerateOptions,
    ) -> Result<String> {
        self.inner.generate(prompt, max_tokens, seed, options).await
    }
}

/// Gateway over a fresh fake judge with no retry delays.
pub fn fake_gateway() -> JudgeGateway {
    JudgeGateway::new(Arc::new(FakeJudge::new()), RetryPolicy::none())
}

pub fn gateway_over(judge: Arc<dyn Judge>) -> JudgeGateway {
    JudgeGateway::new(judge, RetryPolicy::none())
}

// Judge capability — the scoring back-end abstraction.
//
// A Judge wraps one causal language model plus its tokenizer. The default
// implementation is LocalJudge (ONNX model on the local CPU); tests use a
// deterministic in-process fake. Everything above the gateway treats
// tokenization as opaque: token ids, surfaces and per-token cross-entropy
// come only from here.

use async_trait::async_trait;

use crate::error::Result;

/// The tokenization of a text: opaque integer ids plus printable surface
/// forms, index-aligned. Concatenating the surfaces reproduces the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokenization {
    pub ids: Vec<u32>,
    pub surfaces: Vec<String>,
}

impl Tokenization {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Concatenation of all surface forms.
    pub fn surface(&self) -> String {
        self.surfaces.concat()
    }
}

/// One scored token: its id, surface form, and cross-entropy in bits.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredToken {
    pub id: u32,
    pub surface: String,
    pub xent: f64,
}

/// Sampling options for `generate`.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f64,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { temperature: 1.0 }
    }
}

/// Trait for the judge model. Implementations must be deterministic for a
/// fixed model version and seed, and async because inference is either
/// offloaded to a blocking thread or remote.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Tokenize a text. Deterministic.
    async fn tokenize(&self, text: &str) -> Result<Tokenization>;

    /// Per-token cross-entropy of `text` in bits:
    /// `-log2 P(tok_i | context ++ tok_1..tok_{i-1})`. The first token of
    /// `text` is conditioned on `context` alone; an empty context means
    /// the model's beginning-of-sequence marker.
    async fn xent(&self, text: &str, context: &str) -> Result<Vec<ScoredToken>>;

    /// Score several (text, context) pairs, returning results in order.
    /// Default implementation scores sequentially — back-ends with batched
    /// inference can override.
    async fn xent_batch(&self, requests: &[(String, String)]) -> Result<Vec<Vec<ScoredToken>>> {
        let mut results = Vec::with_capacity(requests.len());
        for (text, context) in requests {
            results.push(self.xent(text, context).await?);
        }
        Ok(results)
    }

    /// Seeded sampling, used only for map stories.
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        seed: u64,
        options: &GenerateOptions,
    ) -> Result<String>;
}

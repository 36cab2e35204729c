// Local ONNX judge — a causal language model run on the local CPU.
//
// Holds the model session and tokenizer behind Arc so the CPU-bound work
// (tokenization, forward passes, log-softmax) can be offloaded to
// spawn_blocking without blocking the async runtime. The session sits in
// a Mutex because ort's Session::run takes &mut self; inference is
// serialized through the blocking pool, so contention stays minimal.
//
// Expects `model.onnx` and `tokenizer.json` in the model directory; run
// `xentbench download-judge` first if they are missing.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokenizers::Tokenizer;
use tracing::debug;

use crate::error::{Result, XentError};

use super::traits::{GenerateOptions, Judge, ScoredToken, Tokenization};

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Candidate beginning-of-sequence token strings, tried in order.
const BOS_CANDIDATES: [&str; 4] = ["<s>", "<bos>", "<|bos|>", "<|endoftext|>"];

/// Candidate end-of-sequence token strings, tried in order.
const EOS_CANDIDATES: [&str; 4] = ["</s>", "<eos>", "<|eos|>", "<|endoftext|>"];

pub struct LocalJudge {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    bos_id: u32,
    eos_id: Option<u32>,
}

impl LocalJudge {
    /// Load the ONNX model and tokenizer from the given directory.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join(MODEL_FILE);
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);

        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(XentError::Config(format!(
                "judge model files not found in {} (expected {MODEL_FILE} and {TOKENIZER_FILE}); \
                 run `xentbench download-judge` first",
                model_dir.display()
            )));
        }

        let session = Session::builder()
            .and_then(|mut b| b.commit_from_file(&model_path))
            .map_err(|e| {
                XentError::Config(format!(
                    "failed to load ONNX model from {}: {e}",
                    model_path.display()
                ))
            })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| XentError::Config(format!("failed to load tokenizer: {e}")))?;

        let bos_id = BOS_CANDIDATES
            .iter()
            .find_map(|tok| tokenizer.token_to_id(tok))
            .ok_or_else(|| {
                XentError::Config("tokenizer has no recognizable BOS token".to_string())
            })?;
        let eos_id = EOS_CANDIDATES.iter().find_map(|tok| tokenizer.token_to_id(tok));

        debug!(
            model = %model_path.display(),
            bos_id,
            ?eos_id,
            "Loaded local judge model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            bos_id,
            eos_id,
        })
    }
}

#[async_trait]
impl Judge for LocalJudge {
    async fn tokenize(&self, text: &str) -> Result<Tokenization> {
        let tokenizer = Arc::clone(&self.tokenizer);
        let text = text.to_string();
        run_blocking(move || encode(&tokenizer, &text)).await
    }

    async fn xent(&self, text: &str, context: &str) -> Result<Vec<ScoredToken>> {
        let mut results = self
            .xent_batch(&[(text.to_string(), context.to_string())])
            .await?;
        Ok(results.remove(0))
    }

    /// True batch inference: one padded forward pass over all requests.
    async fn xent_batch(&self, requests: &[(String, String)]) -> Result<Vec<Vec<ScoredToken>>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let bos_id = self.bos_id;
        let requests = requests.to_vec();

        run_blocking(move || {
            // Tokenize every request up front: context ids (BOS when the
            // context is empty) followed by text ids.
            let mut rows: Vec<(Vec<u32>, usize)> = Vec::with_capacity(requests.len());
            for (text, context) in &requests {
                let ctx_ids = context_ids(&tokenizer, context, bos_id)?;
                let text_ids = encode(&tokenizer, text)?.ids;
                let ctx_len = ctx_ids.len();
                let mut ids = ctx_ids;
                ids.extend_from_slice(&text_ids);
                rows.push((ids, ctx_len));
            }

            let batch = rows.len();
            let max_len = rows.iter().map(|(ids, _)| ids.len()).max().unwrap_or(0);
            let logits = forward(&session, &rows, max_len)?;
            let vocab = logits.len() / (batch * max_len);

            let mut results = Vec::with_capacity(batch);
            for (row, (ids, ctx_len)) in rows.iter().enumerate() {
                let mut scored = Vec::with_capacity(ids.len() - ctx_len);
                for pos in *ctx_len..ids.len() {
                    let id = ids[pos];
                    // The logit row at position pos-1 predicts the token
                    // at position pos.
                    let offset = (row * max_len + pos - 1) * vocab;
                    let logit_row = &logits[offset..offset + vocab];
                    let bits = -log_softmax_at(logit_row, id as usize) / std::f64::consts::LN_2;
                    scored.push(ScoredToken {
                        id,
                        surface: decode_one(&tokenizer, id)?,
                        xent: bits,
                    });
                }
                results.push(scored);
            }
            Ok(results)
        })
        .await
    }

    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        seed: u64,
        options: &GenerateOptions,
    ) -> Result<String> {
        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let bos_id = self.bos_id;
        let eos_id = self.eos_id;
        let prompt = prompt.to_string();
        let temperature = options.temperature.max(1e-4);

        run_blocking(move || {
            let mut ids = vec![bos_id];
            ids.extend(encode(&tokenizer, &prompt)?.ids);
            let prompt_len = ids.len();

            let mut rng = StdRng::seed_from_u64(seed);

            // Full forward pass per sampled token; no KV cache.
            for _ in 0..max_tokens {
                let rows = vec![(ids.clone(), 0usize)];
                let logits = forward(&session, &rows, ids.len())?;
                let vocab = logits.len() / ids.len();
                let last = &logits[(ids.len() - 1) * vocab..ids.len() * vocab];

                let next = sample(last, temperature, &mut rng);
                if Some(next) == eos_id {
                    break;
                }
                ids.push(next);
            }

            let generated = &ids[prompt_len..];
            tokenizer
                .decode(generated, true)
                .map_err(|e| XentError::JudgeUnavailable(format!("decode failed: {e}")))
        })
        .await
    }
}

/// Offload CPU-bound judge work to the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| XentError::JudgeUnavailable(format!("blocking task failed: {e}")))?
}

fn encode(tokenizer: &Tokenizer, text: &str) -> Result<Tokenization> {
    let encoding = tokenizer
        .encode(text, false)
        .map_err(|e| XentError::JudgeUnavailable(format!("tokenization failed: {e}")))?;
    let ids = encoding.get_ids().to_vec();
    let mut surfaces = Vec::with_capacity(ids.len());
    for &id in &ids {
        surfaces.push(decode_one(tokenizer, id)?);
    }
    Ok(Tokenization { ids, surfaces })
}

fn decode_one(tokenizer: &Tokenizer, id: u32) -> Result<String> {
    tokenizer
        .decode(&[id], false)
        .map_err(|e| XentError::JudgeUnavailable(format!("decode failed: {e}")))
}

/// The conditioning prefix: the context's tokens, or the BOS marker when
/// the context is empty.
fn context_ids(tokenizer: &Tokenizer, context: &str, bos_id: u32) -> Result<Vec<u32>> {
    if context.is_empty() {
        return Ok(vec![bos_id]);
    }
    let ids = encode(tokenizer, context)?.ids;
    if ids.is_empty() {
        Ok(vec![bos_id])
    } else {
        Ok(ids)
    }
}

/// Run one padded forward pass. `rows` holds (ids, ctx_len) per request;
/// returns the flat logits of shape [batch, max_len, vocab].
fn forward(
    session: &Arc<Mutex<Session>>,
    rows: &[(Vec<u32>, usize)],
    max_len: usize,
) -> Result<Vec<f32>> {
    let batch = rows.len();
    let mut input_ids_flat: Vec<i64> = Vec::with_capacity(batch * max_len);
    let mut attention_mask_flat: Vec<i64> = Vec::with_capacity(batch * max_len);

    for (ids, _) in rows {
        for &id in ids {
            input_ids_flat.push(id as i64);
            attention_mask_flat.push(1);
        }
        // Right-pad to max_len; padded positions are masked out.
        for _ in ids.len()..max_len {
            input_ids_flat.push(0);
            attention_mask_flat.push(0);
        }
    }

    let shape = [batch as i64, max_len as i64];
    let input_ids = Tensor::from_array((shape, input_ids_flat))
        .map_err(|e| XentError::JudgeUnavailable(format!("input tensor: {e}")))?;
    let attention_mask = Tensor::from_array((shape, attention_mask_flat))
        .map_err(|e| XentError::JudgeUnavailable(format!("mask tensor: {e}")))?;

    let mut session = session
        .lock()
        .map_err(|e| XentError::JudgeUnavailable(format!("session lock poisoned: {e}")))?;

    let outputs = session
        .run(ort::inputs! {
            "input_ids" => input_ids,
            "attention_mask" => attention_mask
        })
        .map_err(|e| XentError::JudgeUnavailable(format!("inference failed: {e}")))?;

    let (_shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| XentError::JudgeUnavailable(format!("logits extraction failed: {e}")))?;

    Ok(data.to_vec())
}

/// Log-probability of `id` under the softmax of `logits`, in nats.
fn log_softmax_at(logits: &[f32], id: usize) -> f64 {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
    let sum: f64 = logits.iter().map(|&l| ((l as f64) - max).exp()).sum();
    (logits[id] as f64 - max) - sum.ln()
}

/// Temperature sampling over a logit row.
fn sample(logits: &[f32], temperature: f64, rng: &mut StdRng) -> u32 {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
    let weights: Vec<f64> = logits
        .iter()
        .map(|&l| (((l as f64) - max) / temperature).exp())
        .collect();
    let total: f64 = weights.iter().sum();

    let mut target = rng.random::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        target -= w;
        if target <= 0.0 {
            return i as u32;
        }
    }
    (weights.len() - 1) as u32
}

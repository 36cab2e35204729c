// Remote LLM players over chat-completion APIs.
//
// Two wire formats cover every supported provider: the OpenAI-compatible
// `/chat/completions` shape (OpenAI, Gemini, Grok, DeepSeek, Moonshot)
// and the Anthropic messages API. API keys come from environment
// variables; one HTTP client and one rate-limit bucket are built per
// player spec and shared by every trial that player participates in.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use async_trait::async_trait;

use crate::error::{Result, XentError};

use super::rate_limiter::TokenBucket;
use super::traits::{ChatMessage, Player, RequestParams, Role};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
    Gemini,
    Grok,
    Deepseek,
    Moonshot,
}

impl Provider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::Openai => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            Provider::Grok => "https://api.x.ai/v1",
            Provider::Deepseek => "https://api.deepseek.com/v1",
            Provider::Moonshot => "https://api.moonshot.ai/v1",
        }
    }

    pub fn default_key_env(self) -> &'static str {
        match self {
            Provider::Openai => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
            Provider::Grok => "XAI_API_KEY",
            Provider::Deepseek => "DEEPSEEK_API_KEY",
            Provider::Moonshot => "MOONSHOT_API_KEY",
        }
    }

    fn is_anthropic_wire(self) -> bool {
        matches!(self, Provider::Anthropic)
    }
}

pub struct LlmPlayer {
    client: Client,
    provider: Provider,
    model: String,
    base_url: String,
    api_key: String,
    bucket: TokenBucket,
}

impl LlmPlayer {
    /// Build a player for a provider/model pair. The API key is read from
    /// `api_key_env` (or the provider's default variable).
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        base_url: Option<String>,
        api_key_env: Option<&str>,
        requests_per_second: f64,
    ) -> Result<Self> {
        let key_env = api_key_env.unwrap_or_else(|| provider.default_key_env());
        let api_key = std::env::var(key_env)
            .map_err(|_| XentError::Config(format!("{key_env} not set")))?;

        let client = Client::builder()
            .build()
            .map_err(|e| XentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            provider,
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| provider.default_base_url().to_string()),
            api_key,
            // Allow a small burst; sustained load follows the configured rate.
            bucket: TokenBucket::new(4, requests_per_second),
        })
    }

    fn openai_body(&self, transcript: &[ChatMessage], max_tokens: u32, params: &RequestParams) -> Value {
        let messages: Vec<Value> = transcript
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
        });
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = params.top_p {
            body["top_p"] = json!(p);
        }
        body
    }

    fn anthropic_body(&self, transcript: &[ChatMessage], max_tokens: u32, params: &RequestParams) -> Value {
        // Anthropic takes the system prompt as a top-level field.
        let system: String = transcript
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages: Vec<Value> = transcript
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": if m.role == Role::Assistant { "assistant" } else { "user" },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        body
    }

    fn extract_openai(body: &Value) -> Result<String> {
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                XentError::PlayerUnavailable("response has no message content".to_string())
            })
    }

    fn extract_anthropic(body: &Value) -> Result<String> {
        let blocks = body["content"].as_array().ok_or_else(|| {
            XentError::PlayerUnavailable("response has no content blocks".to_string())
        })?;
        let mut out = String::new();
        for block in blocks {
            if block["type"] == "text" {
                if let Some(text) = block["text"].as_str() {
                    out.push_str(text);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Player for LlmPlayer {
    async fn complete(
        &self,
        transcript: &[ChatMessage],
        max_tokens: u32,
        params: &RequestParams,
    ) -> Result<String> {
        self.bucket.acquire().await;

        let request = if self.provider.is_anthropic_wire() {
            self.client
                .post(format!("{}/messages", self.base_url))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&self.anthropic_body(transcript, max_tokens, params))
        } else {
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&self.openai_body(transcript, max_tokens, params))
        };

        let response = request
            .timeout(params.timeout())
            .send()
            .await
            .map_err(|e| XentError::PlayerUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 429 and 5xx-class failures are worth retrying; anything else
            // (bad key, bad model name) will not fix itself.
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(XentError::PlayerUnavailable(format!("{status}: {body}")))
            } else {
                Err(XentError::Config(format!(
                    "player back-end rejected request ({status}): {body}"
                )))
            };
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| XentError::PlayerUnavailable(format!("bad response body: {e}")))?;

        let text = if self.provider.is_anthropic_wire() {
            Self::extract_anthropic(&body)?
        } else {
            Self::extract_openai(&body)?
        };

        debug!(
            provider = ?self.provider,
            model = %self.model,
            chars = text.len(),
            "Player completion received"
        );
        Ok(text)
    }
}

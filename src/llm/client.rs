// =============================================================================
// LLM Client — chat-completions call to the reasoning endpoint
// =============================================================================
//
// One POST per analysis cycle. Low temperature for consistent decisions and a
// generous token budget for the structured JSON answer. Transport failures
// and non-success statuses surface as `LlmUnavailable`; a 200 whose body is
// not the expected chat-completion shape is `LlmMalformed`. Neither ever
// crashes the scheduler — the cycle simply yields zero decisions.
// =============================================================================

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::config::LlmApiConfig;
use crate::error::{BotError, BotResult};

const TEMPERATURE: f64 = 0.2;
const MAX_TOKENS: u32 = 4000;
/// Reasoning calls are slow; allow well beyond the exchange timeout.
const LLM_TIMEOUT: Duration = Duration::from_secs(240);

/// Raw model response: the assistant message content plus the full body for
/// the audit stream.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub raw: Value,
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &LlmApiConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    /// Submit one system + user prompt pair and return the assistant content.
    #[instrument(skip_all, name = "llm::analyze")]
    pub async fn analyze(&self, system_prompt: &str, user_prompt: &str) -> BotResult<LlmResponse> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });

        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BotError::LlmUnavailable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BotError::LlmUnavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(BotError::LlmUnavailable(format!("{status}: {body}")));
        }

        let raw: Value = serde_json::from_str(&body)
            .map_err(|e| BotError::LlmMalformed(format!("response is not JSON: {e}")))?;

        let content = raw["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                BotError::LlmMalformed("missing choices[0].message.content".into())
            })?
            .to_string();

        debug!(content_len = content.len(), "LLM response received");
        Ok(LlmResponse { content, raw })
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

//! Concrete text-generation providers.
//!
//! All three speak HTTP JSON through `reqwest`: the search-augmented LLM and
//! the OpenAI-compatible endpoint share the chat-completions wire shape, the
//! general LLM uses a `generateContent`-style API. Each provider owns its
//! rate limiter; classification of rate-limit signals is shared.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::rate_limit::MinIntervalLimiter;
use super::{AiError, GenerateOptions};

/// Request timeout for provider calls.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// A text-generation backend.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Generate text for a prompt. Raises [`AiError::RateLimited`] on any
    /// rate/quota signal so the caller can retry on this same provider, and
    /// [`AiError::Provider`] for everything else (including empty output).
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, AiError>;
}

/// Classify a provider failure: HTTP 429 or any "rate"/"quota" wording is a
/// rate limit, everything else a plain provider error.
fn classify(provider: &'static str, status: Option<u16>, message: String) -> AiError {
    let lowered = message.to_lowercase();
    if status == Some(429) || lowered.contains("rate") || lowered.contains("quota") {
        AiError::RateLimited { provider, message }
    } else {
        AiError::Provider { provider, message }
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .expect("reqwest client construction cannot fail with static options")
}

/// Issue an OpenAI-style chat-completions request and pull out the first
/// choice's message content.
async fn chat_completion(
    provider: &'static str,
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    body: serde_json::Value,
) -> Result<String, AiError> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let response = http
        .post(&url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| classify(provider, None, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(classify(
            provider,
            Some(status.as_u16()),
            format!("HTTP {status}: {text}"),
        ));
    }

    let parsed: serde_json::Value = response
        .json()
        .await
        .map_err(|e| classify(provider, None, e.to_string()))?;

    let content = parsed["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .trim()
        .to_string();
    if content.is_empty() {
        return Err(AiError::Provider {
            provider,
            message: "Empty response".to_string(),
        });
    }
    Ok(content)
}

// ---------------------------------------------------------------------------
// Search-augmented LLM
// ---------------------------------------------------------------------------

/// Search-augmented provider (Perplexity-style chat API, fixed model).
pub struct SearchLlmProvider {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
    limiter: MinIntervalLimiter,
}

impl SearchLlmProvider {
    pub fn new(api_key: String, base_url: String, min_call_interval: Duration) -> Self {
        Self {
            api_key,
            base_url,
            http: http_client(),
            limiter: MinIntervalLimiter::new(min_call_interval),
        }
    }
}

#[async_trait]
impl Provider for SearchLlmProvider {
    fn name(&self) -> &'static str {
        "search_llm"
    }

    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String, AiError> {
        self.limiter.acquire().await;
        let body = json!({
            "model": "sonar-pro",
            "messages": [{"role": "user", "content": prompt}],
        });
        chat_completion(self.name(), &self.http, &self.base_url, &self.api_key, body).await
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible LLM
// ---------------------------------------------------------------------------

/// OpenAI-compatible provider (SambaNova-style endpoint, model from config).
pub struct OpenAiCompatProvider {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
    limiter: MinIntervalLimiter,
}

impl OpenAiCompatProvider {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        min_call_interval: Duration,
    ) -> Self {
        Self {
            api_key,
            base_url,
            model,
            http: http_client(),
            limiter: MinIntervalLimiter::new(min_call_interval),
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, AiError> {
        self.limiter.acquire().await;
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        chat_completion(self.name(), &self.http, &self.base_url, &self.api_key, body).await
    }
}

// ---------------------------------------------------------------------------
// General LLM
// ---------------------------------------------------------------------------

/// General-purpose provider (Gemini-style `generateContent` API).
pub struct GeneralLlmProvider {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
    limiter: MinIntervalLimiter,
}

impl GeneralLlmProvider {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        min_call_interval: Duration,
    ) -> Self {
        Self {
            api_key,
            base_url,
            model,
            http: http_client(),
            limiter: MinIntervalLimiter::new(min_call_interval),
        }
    }
}

#[async_trait]
impl Provider for GeneralLlmProvider {
    fn name(&self) -> &'static str {
        "general_llm"
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, AiError> {
        self.limiter.acquire().await;
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": options.temperature,
                "maxOutputTokens": options.max_tokens,
            },
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(self.name(), None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify(
                self.name(),
                Some(status.as_u16()),
                format!("HTTP {status}: {text}"),
            ));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify(self.name(), None, e.to_string()))?;

        let content = parsed["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string();
        if content.is_empty() {
            return Err(AiError::Provider {
                provider: self.name(),
                message: "Empty response".to_string(),
            });
        }
        Ok(content)
    }
}

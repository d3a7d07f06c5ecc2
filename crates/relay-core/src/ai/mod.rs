//! Multi-provider AI helper.
//!
//! One `generate` call fans out over the configured providers in a static
//! order (search-augmented LLM, OpenAI-compatible, general LLM). Rate-limit
//! signals are retried on the same provider with capped exponential backoff;
//! any other provider error falls through to the next. Providers are built
//! lazily on first use and cached for the life of the client.

pub mod json;
pub mod provider;
pub mod rate_limit;
pub mod retry;

use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

pub use json::extract_json;
use provider::{GeneralLlmProvider, OpenAiCompatProvider, Provider, SearchLlmProvider};
use retry::RetryPolicy;

/// Errors surfaced by the AI helper.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("{provider} rate limited: {message}")]
    RateLimited {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },
    #[error("forced provider {0} is not configured")]
    NotConfigured(String),
    #[error("All AI providers failed or not configured")]
    AllProvidersFailed,
}

/// Per-call generation options.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Free-form label for logging which agent asked.
    pub task_type: &'static str,
    /// Keep the search-augmented provider first in the fallback order.
    pub prefer_primary: bool,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            task_type: "general",
            prefer_primary: true,
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

impl GenerateOptions {
    pub fn for_task(task_type: &'static str) -> Self {
        Self {
            task_type,
            ..Self::default()
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// AI provider configuration, resolved from env by the binary.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// `AI_PROVIDER` -- when set, that provider is used exclusively.
    pub forced_provider: Option<String>,
    pub search_api_key: Option<String>,
    pub search_base_url: String,
    pub openai_compat_api_key: Option<String>,
    pub openai_compat_base_url: String,
    pub openai_compat_model: String,
    pub general_api_key: Option<String>,
    pub general_base_url: String,
    pub general_model: String,
    /// Minimum delay between calls per provider.
    pub min_call_interval: Duration,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            forced_provider: None,
            search_api_key: None,
            search_base_url: "https://api.perplexity.ai".to_string(),
            openai_compat_api_key: None,
            openai_compat_base_url: "https://api.sambanova.ai/v1".to_string(),
            openai_compat_model: "deepseek-r1-distill-llama-70b".to_string(),
            general_api_key: None,
            general_base_url: "https://generativelanguage.googleapis.com".to_string(),
            general_model: "gemini-2.0-flash-exp".to_string(),
            min_call_interval: Duration::from_secs(1),
        }
    }
}

/// Normalize an `AI_PROVIDER` value to a canonical provider name. Accepts
/// both the generic names and the vendor names the platform historically
/// used.
fn canonical_provider_name(value: &str) -> Option<&'static str> {
    match value.trim().to_lowercase().as_str() {
        "search_llm" | "perplexity" => Some("search_llm"),
        "openai_compat" | "sambanova" => Some("openai_compat"),
        "general_llm" | "gemini" => Some("general_llm"),
        _ => None,
    }
}

/// Unified text-generation client.
pub struct AiClient {
    config: AiConfig,
    retry: RetryPolicy,
    search: OnceLock<Option<SearchLlmProvider>>,
    openai_compat: OnceLock<Option<OpenAiCompatProvider>>,
    general: OnceLock<Option<GeneralLlmProvider>>,
}

impl std::fmt::Debug for AiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiClient")
            .field("forced_provider", &self.config.forced_provider)
            .finish()
    }
}

impl AiClient {
    pub fn new(config: AiConfig) -> Self {
        Self {
            config,
            retry: RetryPolicy::default(),
            search: OnceLock::new(),
            openai_compat: OnceLock::new(),
            general: OnceLock::new(),
        }
    }

    /// Override the retry policy (tests use short backoffs).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn search_provider(&self) -> Option<&SearchLlmProvider> {
        self.search
            .get_or_init(|| {
                self.config.search_api_key.clone().map(|key| {
                    SearchLlmProvider::new(
                        key,
                        self.config.search_base_url.clone(),
                        self.config.min_call_interval,
                    )
                })
            })
            .as_ref()
    }

    fn openai_compat_provider(&self) -> Option<&OpenAiCompatProvider> {
        self.openai_compat
            .get_or_init(|| {
                self.config.openai_compat_api_key.clone().map(|key| {
                    OpenAiCompatProvider::new(
                        key,
                        self.config.openai_compat_base_url.clone(),
                        self.config.openai_compat_model.clone(),
                        self.config.min_call_interval,
                    )
                })
            })
            .as_ref()
    }

    fn general_provider(&self) -> Option<&GeneralLlmProvider> {
        self.general
            .get_or_init(|| {
                self.config.general_api_key.clone().map(|key| {
                    GeneralLlmProvider::new(
                        key,
                        self.config.general_base_url.clone(),
                        self.config.general_model.clone(),
                        self.config.min_call_interval,
                    )
                })
            })
            .as_ref()
    }

    fn provider_by_name(&self, name: &str) -> Option<&dyn Provider> {
        match name {
            "search_llm" => self.search_provider().map(|p| p as &dyn Provider),
            "openai_compat" => self.openai_compat_provider().map(|p| p as &dyn Provider),
            "general_llm" => self.general_provider().map(|p| p as &dyn Provider),
            _ => None,
        }
    }

    /// Providers in fallback order. `prefer_primary` keeps the search LLM
    /// first; otherwise it is demoted to last resort.
    fn ordered_providers(&self, prefer_primary: bool) -> Vec<&dyn Provider> {
        let names: [&str; 3] = if prefer_primary {
            ["search_llm", "openai_compat", "general_llm"]
        } else {
            ["openai_compat", "general_llm", "search_llm"]
        };
        names
            .iter()
            .filter_map(|name| self.provider_by_name(name))
            .collect()
    }

    /// Generate text for a prompt.
    ///
    /// A forced provider (`AI_PROVIDER`) is used exclusively; otherwise each
    /// configured provider is tried in order until one produces text.
    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, AiError> {
        if let Some(forced) = &self.config.forced_provider {
            match canonical_provider_name(forced) {
                Some(name) => {
                    let provider = self
                        .provider_by_name(name)
                        .ok_or_else(|| AiError::NotConfigured(forced.clone()))?;
                    info!(provider = name, task_type = options.task_type, "using forced provider");
                    return self
                        .retry
                        .execute(|| provider.generate(prompt, options))
                        .await;
                }
                None => {
                    warn!(provider = %forced, "unknown AI_PROVIDER value, using fallback order");
                }
            }
        }

        for provider in self.ordered_providers(options.prefer_primary) {
            info!(
                provider = provider.name(),
                task_type = options.task_type,
                "trying provider"
            );
            match self
                .retry
                .execute(|| provider.generate(prompt, options))
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                }
            }
        }

        Err(AiError::AllProvidersFailed)
    }
}

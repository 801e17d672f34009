pub mod openai;
pub mod openai_compat;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::{OpenAiProvider, ProviderError, ProviderErrorKind};
pub use openai_compat::{custom, deepseek, default_base_url, groq, ollama_with_base};
pub use types::*;

/// Text-completion service used for reply generation and context analysis.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
}

// ============================================================
// Provider Configuration
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[serde(rename = "openai")]
    OpenAI,
    DeepSeek,
    Groq,
    Ollama,
    OpenRouter,
    Together,
    Fireworks,
    /// Custom OpenAI-compatible endpoint
    Custom,
    /// Offline canned replies
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider ID (e.g., "openai", "local-ollama")
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Overrides the preset base URL
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            id: id.into(),
            provider_type,
            api_key: None,
            base_url: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Create a provider from configuration. `timeout` bounds each HTTP call.
pub fn create_provider(config: &ProviderConfig, timeout: Duration) -> Result<Arc<dyn LlmProvider>> {
    if config.provider_type == ProviderType::Stub {
        return Ok(Arc::new(StubProvider));
    }

    let base_url = match (&config.base_url, default_base_url(&config.provider_type)) {
        (Some(url), _) => url.clone(),
        (None, Some(preset)) => preset.to_string(),
        (None, None) => {
            return Err(anyhow!("{} provider requires base_url", config.id));
        }
    };

    let api_key = match (&config.api_key, openai_compat::requires_api_key(&config.provider_type)) {
        (Some(key), _) if !key.is_empty() => key.clone(),
        (_, false) => "ollama".to_string(),
        (_, true) => {
            return Err(anyhow!(
                "{} provider ({:?}) requires api_key",
                config.id,
                config.provider_type
            ));
        }
    };

    Ok(Arc::new(OpenAiProvider::with_timeout(api_key, base_url, timeout)))
}

/// Answers every prompt with the same JSON triplet. Used for dry runs.
pub struct StubProvider;

pub const STUB_REPLIES: [&str; 3] = ["Sounds good!", "Can you tell me more?", "Let me check."];

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        tracing::debug!(model = %request.model, "stub provider answering");
        let text = serde_json::to_string(&STUB_REPLIES)?;
        Ok(LlmResponse::text(text))
    }
}

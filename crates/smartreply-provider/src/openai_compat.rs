//! OpenAI-compatible endpoints (DeepSeek, Groq, Ollama, etc.)
//!
//! These speak the same chat-completions format as OpenAI, only the base URL differs.

use std::time::Duration;

use crate::{OpenAiProvider, ProviderType};

/// Default base URL for a provider type. `Custom` has none.
pub fn default_base_url(provider_type: &ProviderType) -> Option<&'static str> {
    match provider_type {
        ProviderType::OpenAI => Some("https://api.openai.com/v1"),
        // https://platform.deepseek.com/api-docs
        ProviderType::DeepSeek => Some("https://api.deepseek.com/v1"),
        // https://console.groq.com/docs/api
        ProviderType::Groq => Some("https://api.groq.com/openai/v1"),
        ProviderType::Ollama => Some("http://localhost:11434/v1"),
        // https://openrouter.ai/docs
        ProviderType::OpenRouter => Some("https://openrouter.ai/api/v1"),
        // https://docs.together.ai/docs/openai-api-compatibility
        ProviderType::Together => Some("https://api.together.xyz/v1"),
        // https://docs.fireworks.ai/api-reference/introduction
        ProviderType::Fireworks => Some("https://api.fireworks.ai/inference/v1"),
        ProviderType::Custom | ProviderType::Stub => None,
    }
}

/// Whether the endpoint can be called without an API key.
pub fn requires_api_key(provider_type: &ProviderType) -> bool {
    !matches!(provider_type, ProviderType::Ollama | ProviderType::Stub)
}

pub fn deepseek(api_key: impl Into<String>, timeout: Duration) -> OpenAiProvider {
    OpenAiProvider::with_timeout(api_key, "https://api.deepseek.com/v1", timeout)
}

pub fn groq(api_key: impl Into<String>, timeout: Duration) -> OpenAiProvider {
    OpenAiProvider::with_timeout(api_key, "https://api.groq.com/openai/v1", timeout)
}

/// Local Ollama. It ignores the key, but the header still has to carry something.
pub fn ollama_with_base(base_url: impl Into<String>, timeout: Duration) -> OpenAiProvider {
    OpenAiProvider::with_timeout("ollama", base_url, timeout)
}

pub fn custom(
    api_key: impl Into<String>,
    base_url: impl Into<String>,
    timeout: Duration,
) -> OpenAiProvider {
    OpenAiProvider::with_timeout(api_key, base_url, timeout)
}

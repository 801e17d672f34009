use std::sync::Arc;

use smartreply_provider::{LlmProvider, LlmRequest};
use smartreply_schema::REPLY_COUNT;

use crate::prompt::AugmentedPrompt;

/// Served whenever the completion service fails or answers with garbage.
pub const FALLBACK_REPLIES: [&str; 3] = [
    "That sounds great!",
    "I'll get back to you on that.",
    "Let me think about it.",
];

pub fn fallback_replies() -> Vec<String> {
    FALLBACK_REPLIES.iter().map(|r| r.to_string()).collect()
}

/// Removes a surrounding Markdown code fence (```` ```json ```` or ```` ``` ````).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Accepts only a JSON array of strings with at least three usable entries.
/// Returns the trimmed, non-empty entries in order.
pub fn parse_replies(raw: &str) -> Option<Vec<String>> {
    let parsed: Vec<String> = serde_json::from_str(strip_code_fence(raw)).ok()?;
    let usable: Vec<String> = parsed
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();
    (usable.len() >= REPLY_COUNT).then_some(usable)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReplies {
    pub replies: Vec<String>,
    /// True when the fallback triplet was served.
    pub degraded: bool,
    pub tokens_used: Option<u32>,
}

/// Turns an augmented prompt into candidate replies. Never fails.
pub struct ReplyGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ReplyGenerator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    pub async fn generate(&self, prompt: &AugmentedPrompt) -> GeneratedReplies {
        let request = LlmRequest::simple(
            self.model.clone(),
            Some(prompt.system.clone()),
            prompt.user.clone(),
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let response = match self.provider.chat(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(model = %self.model, "completion failed, serving fallback replies: {e}");
                return GeneratedReplies {
                    replies: fallback_replies(),
                    degraded: true,
                    tokens_used: None,
                };
            }
        };

        match parse_replies(&response.text) {
            Some(replies) => GeneratedReplies {
                replies,
                degraded: false,
                tokens_used: response.tokens_used(),
            },
            None => {
                tracing::warn!(
                    model = %self.model,
                    "unusable completion output, serving fallback replies"
                );
                GeneratedReplies {
                    replies: fallback_replies(),
                    degraded: true,
                    tokens_used: response.tokens_used(),
                }
            }
        }
    }
}

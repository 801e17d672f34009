use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use smartreply_provider::{LlmProvider, LlmRequest};
use smartreply_schema::{
    ContextSummary, ConversationMessage, ConversationSettings, ConversationTone, RelevanceScore,
    Sentiment,
};

use crate::generator::strip_code_fence;
use crate::relevance::score_message;

/// Output of the analysis stage, whichever path produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub summary: ContextSummary,
    pub relevance_scores: Vec<RelevanceScore>,
    pub entities: Vec<String>,
}

/// External language-understanding service. Optional; any error it returns is
/// absorbed by the heuristic fallback.
#[async_trait]
pub trait ContextAnalysisService: Send + Sync {
    async fn analyze(
        &self,
        messages: &[ConversationMessage],
        settings: &ConversationSettings,
        now_ms: i64,
    ) -> Result<AnalysisResult>;
}

const ANALYSIS_SYSTEM_PROMPT: &str = "You analyze chat conversations. Respond with a single JSON \
object and nothing else, shaped as {\"contextAnalysis\": {\"topics\": [string], \"sentiment\": \
\"positive\"|\"neutral\"|\"negative\", \"keyEntities\": [string], \"conversationTone\": \
\"formal\"|\"casual\"|\"neutral\", \"language\": ISO 639-1 code}, \"relevanceScores\": \
[{\"messageId\": string, \"score\": number between 0 and 1}], \"entityRecognition\": [string]}.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAnalysis {
    context_analysis: WireContext,
    #[serde(default)]
    relevance_scores: Vec<WireScore>,
    #[serde(default)]
    entity_recognition: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireContext {
    #[serde(default)]
    topics: Vec<String>,
    sentiment: Sentiment,
    #[serde(default)]
    key_entities: Vec<String>,
    conversation_tone: ConversationTone,
    language: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireScore {
    message_id: String,
    score: f64,
}

/// Context analysis backed by a completion provider.
pub struct LlmContextAnalyzer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
}

impl LlmContextAnalyzer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 500,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_prompt(messages: &[ConversationMessage], settings: &ConversationSettings) -> String {
        let mut prompt = format!(
            "Tone preference: {}\nAuto-translate: {}\n\nMessages (newest first):\n",
            settings.tone_preference, settings.auto_translate
        );
        for message in messages {
            prompt.push_str(&format!(
                "- id={} sender={}: {}\n",
                message.id, message.sender_id, message.text
            ));
        }
        prompt
    }
}

#[async_trait]
impl ContextAnalysisService for LlmContextAnalyzer {
    async fn analyze(
        &self,
        messages: &[ConversationMessage],
        settings: &ConversationSettings,
        now_ms: i64,
    ) -> Result<AnalysisResult> {
        let request = LlmRequest::simple(
            self.model.clone(),
            Some(ANALYSIS_SYSTEM_PROMPT.to_string()),
            Self::build_prompt(messages, settings),
        )
        .with_max_tokens(self.max_tokens)
        .with_temperature(0.0);

        let response = self.provider.chat(request).await?;
        parse_analysis(&response.text, messages, now_ms)
    }
}

/// Strict decode of the analysis payload. Relevance factors are always
/// computed locally; the service only contributes the overall score.
pub fn parse_analysis(
    raw: &str,
    messages: &[ConversationMessage],
    now_ms: i64,
) -> Result<AnalysisResult> {
    let wire: WireAnalysis =
        serde_json::from_str(strip_code_fence(raw)).context("malformed analysis response")?;

    let language = wire.context_analysis.language.trim().to_lowercase();
    if language.is_empty() {
        return Err(anyhow!("analysis response has an empty language"));
    }

    let remote: HashMap<&str, f64> = wire
        .relevance_scores
        .iter()
        .filter(|s| s.score.is_finite())
        .map(|s| (s.message_id.as_str(), s.score.clamp(0.0, 1.0)))
        .collect();
    let relevance_scores = messages
        .iter()
        .map(|m| {
            let mut local = score_message(m, now_ms);
            if let Some(score) = remote.get(m.id.as_str()) {
                local.score = *score;
            }
            local
        })
        .collect();

    let entities = if wire.entity_recognition.is_empty() {
        wire.context_analysis.key_entities.clone()
    } else {
        wire.entity_recognition
    };

    Ok(AnalysisResult {
        summary: ContextSummary {
            topics: wire.context_analysis.topics,
            sentiment: wire.context_analysis.sentiment,
            key_entities: wire.context_analysis.key_entities,
            conversation_tone: wire.context_analysis.conversation_tone,
            language,
            message_count: messages.len(),
        },
        relevance_scores,
        entities,
    })
}

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of replies every deliverable record carries.
pub const REPLY_COUNT: usize = 3;
/// Upper bound on a single reply, counted in characters.
pub const MAX_REPLY_CHARS: usize = 100;

/// Cache and settings key for a (conversation, user) pair.
pub fn record_key(conversation_id: &str, user_id: &str) -> String {
    format!("{conversation_id}_{user_id}")
}

/// A message as handed over by the message store. Read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub id: String,
    pub text: String,
    pub sender_id: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
}

impl ConversationMessage {
    pub fn new(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            sender_id: sender_id.into(),
            timestamp_ms,
            language: None,
            tone: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }
}

/// Tone detected in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationTone {
    Formal,
    Casual,
    #[default]
    Neutral,
}

impl ConversationTone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Formal => "formal",
            Self::Casual => "casual",
            Self::Neutral => "neutral",
        }
    }
}

/// Tone a user asked for. `Auto` follows the detected conversation tone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TonePreference {
    Formal,
    Casual,
    #[default]
    Auto,
}

impl TonePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Formal => "formal",
            Self::Casual => "casual",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for TonePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TonePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "formal" => Ok(Self::Formal),
            "casual" => Ok(Self::Casual),
            "auto" => Ok(Self::Auto),
            other => Err(anyhow!("unknown tone preference: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RelevanceFactors {
    pub recency: f64,
    pub engagement: f64,
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelevanceScore {
    pub message_id: String,
    pub score: f64,
    pub factors: RelevanceFactors,
}

/// Snapshot of what a message batch is about. Recomputed on every run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextSummary {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub key_entities: Vec<String>,
    #[serde(default)]
    pub conversation_tone: ConversationTone,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub message_count: usize,
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for ContextSummary {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            sentiment: Sentiment::Neutral,
            key_entities: Vec::new(),
            conversation_tone: ConversationTone::Neutral,
            language: default_language(),
            message_count: 0,
        }
    }
}

/// Per-user, per-conversation preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSettings {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub tone_preference: TonePreference,
    pub auto_translate: bool,
    pub smart_replies_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSettings {
    /// Settings written on first access: `auto` tone, no translation, replies on.
    pub fn with_defaults(conversation_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: record_key(conversation_id, user_id),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            tone_preference: TonePreference::Auto,
            auto_translate: false,
            smart_replies_enabled: true,
            updated_at: now,
        }
    }
}

/// Partial update applied on top of existing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SettingsPatch {
    #[serde(default)]
    pub tone_preference: Option<TonePreference>,
    #[serde(default)]
    pub auto_translate: Option<bool>,
    #[serde(default)]
    pub smart_replies_enabled: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.tone_preference.is_none()
            && self.auto_translate.is_none()
            && self.smart_replies_enabled.is_none()
    }
}

/// Context snapshot stored alongside a generated triplet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextAnalysis {
    pub topics: Vec<String>,
    pub sentiment: Sentiment,
    pub entities: Vec<String>,
    pub language: String,
    pub tone: ConversationTone,
    pub message_count: usize,
    pub analyzed_at: DateTime<Utc>,
}

impl ContextAnalysis {
    pub fn from_summary(
        summary: &ContextSummary,
        entities: Vec<String>,
        analyzed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topics: summary.topics.clone(),
            sentiment: summary.sentiment,
            entities,
            language: summary.language.clone(),
            tone: summary.conversation_tone,
            message_count: summary.message_count,
            analyzed_at,
        }
    }

    pub fn empty(analyzed_at: DateTime<Utc>) -> Self {
        Self::from_summary(&ContextSummary::default(), Vec::new(), analyzed_at)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GeneratedBy {
    Auto,
    Manual,
}

impl GeneratedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

/// Cached reply triplet for one (conversation, user) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmartReplyRecord {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub replies: Vec<String>,
    pub context_analysis: ContextAnalysis,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub generated_by: GeneratedBy,
}

impl SmartReplyRecord {
    /// Stand-in result for an aborted pipeline run. Must never be persisted.
    pub fn placeholder(conversation_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: record_key(conversation_id, user_id),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            replies: Vec::new(),
            context_analysis: ContextAnalysis::empty(now),
            generated_at: now,
            expires_at: Some(now),
            generated_by: GeneratedBy::Auto,
        }
    }

    /// Exactly three non-empty replies, none longer than the reply limit.
    pub fn is_deliverable(&self) -> bool {
        self.replies.len() == REPLY_COUNT
            && self.replies.iter().all(|r| is_valid_reply(r))
    }
}

/// Non-empty after trimming and within the character limit.
pub fn is_valid_reply(reply: &str) -> bool {
    let trimmed = reply.trim();
    !trimmed.is_empty() && trimmed.chars().count() <= MAX_REPLY_CHARS
}

/// Timing and outcome of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineStepRecord {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Caller-supplied knobs for a single generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenerateOptions {
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Author of the message that triggered the request. When it equals the
    /// requesting user nothing is generated: nobody gets suggestions for a
    /// reply to their own message.
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
}

impl GenerateOptions {
    pub fn forced() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn with_target_language(mut self, language: impl Into<String>) -> Self {
        self.target_language = Some(language.into());
        self
    }

    pub fn is_own_message(&self, user_id: &str) -> bool {
        self.sender_id.as_deref() == Some(user_id)
    }
}

/// What a caller gets back from a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub success: bool,
    #[serde(default)]
    pub smart_replies: Option<SmartReplyRecord>,
    pub processing_time_ms: u64,
    pub cache_hit: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// External events that may lead to regeneration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationTrigger {
    NewMessage {
        conversation_id: String,
        sender_id: String,
    },
    SettingsChanged {
        before: ConversationSettings,
        after: ConversationSettings,
    },
    ParticipantAdded {
        conversation_id: String,
        user_id: String,
    },
    ManualRefresh {
        conversation_id: String,
        user_id: String,
        #[serde(default)]
        target_language: Option<String>,
    },
}

impl GenerationTrigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::SettingsChanged { .. } => "settings_changed",
            Self::ParticipantAdded { .. } => "participant_added",
            Self::ManualRefresh { .. } => "manual_refresh",
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            Self::NewMessage {
                conversation_id, ..
            }
            | Self::ParticipantAdded {
                conversation_id, ..
            }
            | Self::ManualRefresh {
                conversation_id, ..
            } => conversation_id,
            Self::SettingsChanged { after, .. } => &after.conversation_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusMessage {
    GenerationRequested {
        trigger: GenerationTrigger,
    },
    RepliesReady {
        record: SmartReplyRecord,
        cache_hit: bool,
    },
    GenerationFailed {
        conversation_id: String,
        user_id: String,
        error: String,
    },
}

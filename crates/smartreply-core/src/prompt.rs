use chrono::{DateTime, SecondsFormat, Utc};
use smartreply_schema::{
    ContextSummary, ConversationMessage, ConversationSettings, ConversationTone, TonePreference,
    MAX_REPLY_CHARS, REPLY_COUNT,
};

/// Prompt pair sent to the completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedPrompt {
    pub system: String,
    pub user: String,
    pub target_language: String,
    pub effective_tone: String,
    /// Messages that fit into the character budget.
    pub included_messages: usize,
}

/// `auto` follows the conversation: formal stays formal, anything else is casual.
pub fn effective_tone(preference: TonePreference, detected: ConversationTone) -> &'static str {
    match preference {
        TonePreference::Auto if detected == ConversationTone::Formal => "formal",
        TonePreference::Auto => "casual",
        TonePreference::Formal => "formal",
        TonePreference::Casual => "casual",
    }
}

fn format_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| timestamp_ms.to_string())
}

pub struct PromptAugmenter {
    context_window_size: usize,
}

impl PromptAugmenter {
    pub fn new(context_window_size: usize) -> Self {
        Self {
            context_window_size,
        }
    }

    /// Oldest-first transcript, one `[timestamp] text` line per message,
    /// cut at the first message that would overflow the budget.
    pub fn transcript(&self, messages: &[ConversationMessage]) -> (String, usize) {
        let mut ordered: Vec<&ConversationMessage> = messages.iter().collect();
        ordered.sort_by_key(|m| m.timestamp_ms);

        let mut out = String::new();
        let mut used = 0usize;
        let mut included = 0usize;
        for message in ordered {
            let line = format!("[{}] {}\n", format_timestamp(message.timestamp_ms), message.text);
            let len = line.chars().count();
            if used + len > self.context_window_size {
                break;
            }
            used += len;
            included += 1;
            out.push_str(&line);
        }
        (out, included)
    }

    pub fn build(
        &self,
        messages: &[ConversationMessage],
        summary: &ContextSummary,
        settings: &ConversationSettings,
        target_language: Option<&str>,
    ) -> AugmentedPrompt {
        let tone = effective_tone(settings.tone_preference, summary.conversation_tone);
        let language = target_language
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(summary.language.as_str())
            .to_string();
        let (transcript, included) = self.transcript(messages);

        let system = format!(
            "You suggest short replies for a chat user. Produce exactly {REPLY_COUNT} distinct \
             replies, each under {MAX_REPLY_CHARS} characters, written only in language \
             \"{language}\" with a {tone} tone. Respond with a JSON array of {REPLY_COUNT} \
             strings and nothing else."
        );

        let join = |items: &[String]| {
            if items.is_empty() {
                "none".to_string()
            } else {
                items.join(", ")
            }
        };
        let user = format!(
            "Conversation:\n{transcript}\nTopics: {}\nSentiment: {}\nKey entities: {}\n\
             Detected language: {}\nConversation tone: {}\nReply tone: {tone}\n\
             Reply language: {language}\n\nSuggest {REPLY_COUNT} replies as a JSON array of strings.",
            join(&summary.topics),
            summary.sentiment.as_str(),
            join(&summary.key_entities),
            summary.language,
            summary.conversation_tone.as_str(),
        );

        AugmentedPrompt {
            system,
            user,
            target_language: language,
            effective_tone: tone.to_string(),
            included_messages: included,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartreply_schema::Sentiment;

    fn settings(pref: TonePreference) -> ConversationSettings {
        let mut s = ConversationSettings::with_defaults("c", "u", Utc::now());
        s.tone_preference = pref;
        s
    }

    fn summary() -> ContextSummary {
        ContextSummary {
            topics: vec!["travel".into()],
            sentiment: Sentiment::Positive,
            key_entities: vec!["Lisbon".into()],
            conversation_tone: ConversationTone::Neutral,
            language: "pt".into(),
            message_count: 2,
        }
    }

    #[test]
    fn effective_tone_rules() {
        use ConversationTone::*;
        assert_eq!(effective_tone(TonePreference::Auto, Formal), "formal");
        assert_eq!(effective_tone(TonePreference::Auto, Casual), "casual");
        assert_eq!(effective_tone(TonePreference::Auto, Neutral), "casual");
        assert_eq!(effective_tone(TonePreference::Formal, Casual), "formal");
        assert_eq!(effective_tone(TonePreference::Casual, Formal), "casual");
    }

    #[test]
    fn transcript_is_chronological_with_iso_timestamps() {
        let augmenter = PromptAugmenter::new(4000);
        let messages = vec![
            ConversationMessage::new("m2", "b", "second", 60_000),
            ConversationMessage::new("m1", "a", "first", 0),
        ];
        let (text, included) = augmenter.transcript(&messages);
        assert_eq!(
            text,
            "[1970-01-01T00:00:00.000Z] first\n[1970-01-01T00:01:00.000Z] second\n"
        );
        assert_eq!(included, 2);
    }

    #[test]
    fn transcript_stops_at_budget() {
        // 38 chars per line
        let augmenter = PromptAugmenter::new(60);
        let messages: Vec<_> = (0..5)
            .map(|i| ConversationMessage::new(format!("m{i}"), "a", "0123456789", i * 1000))
            .collect();
        let (text, included) = augmenter.transcript(&messages);
        assert_eq!(included, 1);
        assert!(text.ends_with("0123456789\n"));
        assert!(text.chars().count() <= 60);
    }

    #[test]
    fn build_uses_detected_language_unless_overridden() {
        let augmenter = PromptAugmenter::new(4000);
        let messages = vec![ConversationMessage::new("m1", "a", "Olá!", 0)];

        let prompt = augmenter.build(&messages, &summary(), &settings(TonePreference::Auto), None);
        assert_eq!(prompt.target_language, "pt");
        assert_eq!(prompt.effective_tone, "casual");
        assert!(prompt.system.contains("exactly 3"));
        assert!(prompt.system.contains("JSON array"));
        assert!(prompt.user.contains("Topics: travel"));
        assert!(prompt.user.contains("Key entities: Lisbon"));
        assert!(prompt.user.contains("Sentiment: positive"));

        let prompt = augmenter.build(
            &messages,
            &summary(),
            &settings(TonePreference::Formal),
            Some("fr"),
        );
        assert_eq!(prompt.target_language, "fr");
        assert_eq!(prompt.effective_tone, "formal");
        assert!(prompt.system.contains("\"fr\""));
    }
}

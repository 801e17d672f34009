//! Deterministic context analysis. Never fails; used whenever the analysis
//! service is absent or misbehaves.

use std::sync::LazyLock;

use regex::Regex;
use smartreply_schema::{ContextSummary, ConversationMessage, ConversationTone, Sentiment};

use crate::analyzer::AnalysisResult;
use crate::entities::{extract_entities, extract_topics};
use crate::relevance::score_messages;

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "awesome", "amazing", "love", "happy", "excellent", "nice", "thanks",
    "thank", "wonderful", "fantastic", "glad", "perfect", "cool", "yay", "excited", "fun",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "hate", "sad", "angry", "upset", "sorry", "problem", "wrong",
    "annoying", "worried", "horrible", "disappointed", "sucks", "fail", "failed", "broken",
];

const POLITE_CUES: &[&str] = &[
    "please", "thank you", "kindly", "regards", "sincerely", "would you", "could you",
    "appreciate", "dear", "sir", "madam", "apologize",
];

const CASUAL_CUES: &[&str] = &[
    "lol", "lmao", "omg", "gonna", "wanna", "gotta", "yeah", "yep", "nope", "hey", "yo", "btw",
    "brb", "haha", "u", "ur", "dude", "bro", "kinda", "sup",
];

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}']+").expect("word regex"));

/// Stop-word patterns per language. `en` comes first and wins ties.
static LANGUAGE_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("en", r"(?i)\b(the|and|is|are|you|that|this|with|have|what|for|not)\b"),
        ("es", r"(?i)\b(el|la|los|las|que|es|y|de|para|con|por|pero|una)\b"),
        ("fr", r"(?i)\b(le|la|les|et|est|que|pour|avec|une|des|pas|je|vous)\b"),
        ("de", r"(?i)\b(der|die|das|und|ist|nicht|ich|mit|für|ein|eine|zu)\b"),
        ("pt", r"(?i)\b(o|os|as|que|e|é|não|para|com|uma|um|você)\b"),
        ("it", r"(?i)\b(il|lo|gli|che|è|non|per|con|una|sono|della|ciao)\b"),
    ]
    .into_iter()
    .map(|(lang, pattern)| (lang, Regex::new(pattern).expect("language regex")))
    .collect()
});

pub fn detect_sentiment(text: &str) -> Sentiment {
    let (mut positive, mut negative) = (0usize, 0usize);
    for word in WORD.find_iter(&text.to_lowercase()) {
        let word = word.as_str();
        if POSITIVE_WORDS.contains(&word) {
            positive += 1;
        } else if NEGATIVE_WORDS.contains(&word) {
            negative += 1;
        }
    }
    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

fn is_emoji(c: char) -> bool {
    matches!(c as u32, 0x1F300..=0x1FAFF | 0x2600..=0x27BF | 0x1F1E6..=0x1F1FF)
}

pub fn detect_tone(text: &str) -> ConversationTone {
    let lower = text.to_lowercase();
    let words: Vec<&str> = WORD.find_iter(&lower).map(|m| m.as_str()).collect();

    let formal = POLITE_CUES
        .iter()
        .filter(|cue| {
            if cue.contains(' ') {
                lower.contains(*cue)
            } else {
                words.contains(cue)
            }
        })
        .count();
    let casual = CASUAL_CUES.iter().filter(|cue| words.contains(cue)).count()
        + text.chars().filter(|c| is_emoji(*c)).count();

    match formal.cmp(&casual) {
        std::cmp::Ordering::Greater => ConversationTone::Formal,
        std::cmp::Ordering::Less => ConversationTone::Casual,
        std::cmp::Ordering::Equal => ConversationTone::Neutral,
    }
}

/// Language whose stop words match most often; `en` when nothing matches.
pub fn detect_language(text: &str) -> String {
    let mut best = ("en", 0usize);
    for (lang, pattern) in LANGUAGE_PATTERNS.iter() {
        let hits = pattern.find_iter(text).count();
        if hits > best.1 {
            best = (lang, hits);
        }
    }
    best.0.to_string()
}

fn joined_text(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicContextAnalyzer;

impl HeuristicContextAnalyzer {
    pub fn summarize(&self, messages: &[ConversationMessage]) -> ContextSummary {
        let text = joined_text(messages);
        ContextSummary {
            topics: extract_topics(&text),
            sentiment: detect_sentiment(&text),
            key_entities: extract_entities(&text),
            conversation_tone: detect_tone(&text),
            language: detect_language(&text),
            message_count: messages.len(),
        }
    }

    /// Summary, per-message relevance and entities over the concatenated text.
    pub fn analyze(&self, messages: &[ConversationMessage], now_ms: i64) -> AnalysisResult {
        let summary = self.summarize(messages);
        let entities = summary.key_entities.clone();
        AnalysisResult {
            summary,
            relevance_scores: score_messages(messages, now_ms),
            entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(texts: &[&str]) -> Vec<ConversationMessage> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| ConversationMessage::new(format!("m{i}"), "u1", *t, i as i64 * 1000))
            .collect()
    }

    #[test]
    fn sentiment_counts_words() {
        assert_eq!(detect_sentiment("This is great, I love it"), Sentiment::Positive);
        assert_eq!(detect_sentiment("terrible day, so upset"), Sentiment::Negative);
        assert_eq!(detect_sentiment("good but bad"), Sentiment::Neutral);
        assert_eq!(detect_sentiment(""), Sentiment::Neutral);
    }

    #[test]
    fn tone_detects_politeness_and_slang() {
        assert_eq!(
            detect_tone("Could you please send the report? Thank you."),
            ConversationTone::Formal
        );
        assert_eq!(detect_tone("lol yeah gonna be there"), ConversationTone::Casual);
        assert_eq!(detect_tone("see you at 5 🎉"), ConversationTone::Casual);
        assert_eq!(detect_tone("meeting at noon"), ConversationTone::Neutral);
    }

    #[test]
    fn language_prefers_most_stop_word_hits() {
        assert_eq!(detect_language("Hola, ¿qué tal? Vamos a la playa con los amigos"), "es");
        assert_eq!(detect_language("Ich bin nicht sicher, ob das und die Zeit passt"), "de");
        assert_eq!(detect_language("What is the plan for this weekend?"), "en");
        assert_eq!(detect_language("12345"), "en");
    }

    #[test]
    fn analyzer_never_fails_on_empty_input() {
        let result = HeuristicContextAnalyzer.analyze(&[], 0);
        assert_eq!(result.summary, ContextSummary::default());
        assert!(result.relevance_scores.is_empty());
        assert!(result.entities.is_empty());
    }

    #[test]
    fn analyzer_combines_all_signals() {
        let messages = msgs(&[
            "Hey, lunch with Maria tomorrow?",
            "Yeah sounds great, love that place",
        ]);
        let result = HeuristicContextAnalyzer.analyze(&messages, 10_000);
        assert_eq!(result.summary.topics, vec!["food"]);
        assert_eq!(result.summary.sentiment, Sentiment::Positive);
        assert_eq!(result.summary.conversation_tone, ConversationTone::Casual);
        assert_eq!(result.summary.language, "en");
        assert_eq!(result.summary.message_count, 2);
        assert_eq!(result.entities, vec!["Maria"]);
        assert_eq!(result.relevance_scores.len(), 2);
        assert_eq!(result.relevance_scores[1].message_id, "m1");
    }
}

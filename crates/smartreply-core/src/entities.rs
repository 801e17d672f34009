//! Pattern-based topic and entity extraction.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

const MAX_ENTITIES: usize = 10;

/// Topic name and the keywords that signal it. Matched as lowercase substrings.
const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "work",
        &["meeting", "project", "deadline", "office", "client", "report", "work"],
    ),
    (
        "travel",
        &["flight", "trip", "hotel", "vacation", "airport", "travel", "booking"],
    ),
    (
        "food",
        &["dinner", "lunch", "breakfast", "restaurant", "coffee", "pizza", "food"],
    ),
    (
        "sports",
        &["game", "match", "football", "soccer", "basketball", "gym", "workout"],
    ),
    (
        "technology",
        &["computer", "phone", "app", "software", "laptop", "update", "bug"],
    ),
    (
        "health",
        &["doctor", "sick", "hospital", "medicine", "appointment", "health"],
    ),
    (
        "family",
        &["mom", "dad", "family", "kids", "brother", "sister", "parents"],
    ),
    (
        "entertainment",
        &["movie", "music", "concert", "show", "series", "netflix", "party"],
    ),
    ("weather", &["weather", "rain", "sunny", "snow", "forecast", "storm"]),
    (
        "shopping",
        &["buy", "shop", "store", "order", "delivery", "price", "sale"],
    ),
    (
        "education",
        &["school", "class", "exam", "homework", "study", "university", "course"],
    ),
    (
        "finance",
        &["money", "bank", "payment", "invoice", "budget", "salary", "rent"],
    ),
];

/// Capitalized words that carry no entity on their own.
const COMMON_CAPITALIZED: &[&str] = &[
    "I", "I'm", "I'll", "I've", "I'd", "The", "A", "An", "And", "But", "Or", "So", "If", "It",
    "It's", "This", "That", "These", "Those", "We", "You", "He", "She", "They", "My", "Your",
    "Our", "Yes", "No", "Ok", "Okay", "Hi", "Hello", "Hey", "Thanks", "Thank", "Please", "What",
    "When", "Where", "Why", "How", "Who", "Can", "Could", "Would", "Should", "Will", "Do", "Did",
    "Is", "Are", "Was", "Sure", "Maybe", "Let", "Just", "Also", "Not", "Good", "Great", "Yeah",
    "Yep", "Oh", "Lol", "Haha", "See", "Sounds", "Tomorrow", "Today", "Tonight",
];

static PROPER_NOUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-zA-Z'’]+(?:\s+[A-Z][a-zA-Z'’]+)*\b").expect("proper noun regex")
});

static MENTION_OR_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[@#][A-Za-z0-9_]{2,}").expect("mention regex"));

/// Topics whose keywords appear anywhere in `text`, in list order.
pub fn extract_topics(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOPIC_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(topic, _)| topic.to_string())
        .collect()
}

/// Proper nouns, @mentions and #hashtags, first occurrence order, deduplicated.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    let mut candidates: Vec<(usize, String)> = Vec::new();
    for m in PROPER_NOUN.find_iter(text) {
        let phrase = strip_common_prefix(m.as_str());
        if !phrase.is_empty() {
            candidates.push((m.start(), phrase));
        }
    }
    for m in MENTION_OR_TAG.find_iter(text) {
        candidates.push((m.start(), m.as_str().to_string()));
    }
    candidates.sort_by_key(|(pos, _)| *pos);

    for (_, candidate) in candidates {
        if seen.insert(candidate.to_lowercase()) {
            entities.push(candidate);
            if entities.len() >= MAX_ENTITIES {
                break;
            }
        }
    }
    entities
}

/// Drops leading filler words ("Hey Anna" -> "Anna"). Returns empty when
/// nothing meaningful is left.
fn strip_common_prefix(phrase: &str) -> String {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let first_meaningful = words
        .iter()
        .position(|w| !COMMON_CAPITALIZED.contains(w))
        .unwrap_or(words.len());
    words[first_meaningful..].join(" ")
}

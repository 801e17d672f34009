use smartreply_schema::{ConversationMessage, RelevanceFactors, RelevanceScore};

const MS_PER_HOUR: f64 = 3_600_000.0;
const RECENCY_HALF_LIFE_HOURS: f64 = 24.0;

const RECENCY_WEIGHT: f64 = 0.4;
const ENGAGEMENT_WEIGHT: f64 = 0.3;
const IMPORTANCE_WEIGHT: f64 = 0.3;

/// Score one message relative to `now_ms`.
///
/// Messages stamped in the future are treated as brand new so the score stays
/// within `[0, 1.06]`.
pub fn score_message(message: &ConversationMessage, now_ms: i64) -> RelevanceScore {
    let age_hours = ((now_ms - message.timestamp_ms) as f64 / MS_PER_HOUR).max(0.0);
    let recency = (-age_hours / RECENCY_HALF_LIFE_HOURS).exp();
    let engagement = (message.text.chars().count() as f64 / 100.0).min(1.0);
    let importance = if message.text.contains('?') { 1.2 } else { 1.0 };

    RelevanceScore {
        message_id: message.id.clone(),
        score: RECENCY_WEIGHT * recency
            + ENGAGEMENT_WEIGHT * engagement
            + IMPORTANCE_WEIGHT * importance,
        factors: RelevanceFactors {
            recency,
            engagement,
            importance,
        },
    }
}

pub fn score_messages(messages: &[ConversationMessage], now_ms: i64) -> Vec<RelevanceScore> {
    messages.iter().map(|m| score_message(m, now_ms)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3_600_000;

    fn message(text: &str, timestamp_ms: i64) -> ConversationMessage {
        ConversationMessage::new("m1", "u1", text, timestamp_ms)
    }

    #[test]
    fn fresh_question_scores_highest() {
        let now = 1_700_000_000_000;
        let text = "x".repeat(99) + "?";
        let score = score_message(&message(&text, now), now);
        assert_eq!(score.factors.recency, 1.0);
        assert_eq!(score.factors.engagement, 1.0);
        assert_eq!(score.factors.importance, 1.2);
        assert!((score.score - 1.06).abs() < 1e-12);
    }

    #[test]
    fn recency_decays_with_24h_constant() {
        let now = 1_700_000_000_000;
        let score = score_message(&message("hello", now - 24 * HOUR), now);
        assert!((score.factors.recency - (-1.0f64).exp()).abs() < 1e-12);
        assert_eq!(score.factors.engagement, 0.05);
        assert_eq!(score.factors.importance, 1.0);

        let expected = 0.4 * (-1.0f64).exp() + 0.3 * 0.05 + 0.3 * 1.0;
        assert_eq!(score.score, expected);
    }

    #[test]
    fn engagement_caps_at_one() {
        let now = 0;
        let long = "a".repeat(250);
        assert_eq!(score_message(&message(&long, now), now).factors.engagement, 1.0);
    }

    #[test]
    fn scores_stay_in_range() {
        let now = 1_700_000_000_000;
        let long = "long text ".repeat(40);
        let texts = ["", "ok", "what?", long.as_str()];
        for text in texts {
            for age in [0, HOUR, 48 * HOUR, 10_000 * HOUR, -5 * HOUR] {
                let score = score_message(&message(text, now - age), now).score;
                assert!(score >= 0.0, "{score} below zero");
                assert!(score <= 1.06 + 1e-9, "{score} above bound");
            }
        }
    }

    #[test]
    fn scoring_is_deterministic() {
        let now = 1_700_000_000_000;
        let m = message("same input?", now - 3 * HOUR);
        assert_eq!(score_message(&m, now), score_message(&m, now));
        assert_eq!(score_messages(&[m.clone(), m], now).len(), 2);
    }
}

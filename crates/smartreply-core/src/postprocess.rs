use smartreply_schema::{is_valid_reply, ConversationSettings, TonePreference, REPLY_COUNT};

const FORMAL_FALLBACKS: [&str; 3] = [
    "Thank you for your message.",
    "I will get back to you shortly.",
    "Could you please provide more details?",
];

const CASUAL_FALLBACKS: [&str; 3] = ["Sounds good!", "Got it 👍", "Tell me more!"];

const NEUTRAL_FALLBACKS: [&str; 3] = ["Okay, thanks!", "Let me check.", "Sounds good."];

const FORMAL_GREETINGS: [&str; 3] = [
    "Hello, how are you?",
    "Good day! How may I help?",
    "Nice to meet you.",
];

const CASUAL_GREETINGS: [&str; 3] = ["Hey! 👋", "What's up?", "Hi there!"];

const NEUTRAL_GREETINGS: [&str; 3] = ["Hello!", "Hi, how are you?", "Nice to hear from you!"];

/// Padding entries for the user's tone preference. `auto` gets the neutral set.
pub fn tone_fallbacks(preference: TonePreference) -> [&'static str; 3] {
    match preference {
        TonePreference::Formal => FORMAL_FALLBACKS,
        TonePreference::Casual => CASUAL_FALLBACKS,
        TonePreference::Auto => NEUTRAL_FALLBACKS,
    }
}

/// Opening lines offered when a conversation has no messages yet.
pub fn greeting_replies(preference: TonePreference) -> Vec<String> {
    let set = match preference {
        TonePreference::Formal => FORMAL_GREETINGS,
        TonePreference::Casual => CASUAL_GREETINGS,
        TonePreference::Auto => NEUTRAL_GREETINGS,
    };
    set.iter().map(|g| g.to_string()).collect()
}

/// Keeps valid candidates and pads from the tone fallbacks. Always returns
/// exactly three replies.
pub fn post_process(candidates: &[String], settings: &ConversationSettings) -> Vec<String> {
    candidates
        .iter()
        .map(|c| c.trim())
        .filter(|c| is_valid_reply(c))
        .map(str::to_string)
        .chain(
            tone_fallbacks(settings.tone_preference)
                .iter()
                .map(|f| f.to_string()),
        )
        .take(REPLY_COUNT)
        .collect()
}

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use smartreply_schema::{ConversationSettings, SettingsPatch};
use smartreply_store::SettingsStore;

/// Only tone and the enable switch change what gets generated.
pub fn requires_regeneration(before: &ConversationSettings, after: &ConversationSettings) -> bool {
    before.tone_preference != after.tone_preference
        || before.smart_replies_enabled != after.smart_replies_enabled
}

#[derive(Clone)]
pub struct SettingsManager {
    store: Arc<dyn SettingsStore>,
}

impl SettingsManager {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Stored settings, or the defaults written on first access.
    pub async fn get_or_create(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<ConversationSettings> {
        if let Some(settings) = self.store.get_settings(conversation_id, user_id).await? {
            return Ok(settings);
        }

        let settings = ConversationSettings::with_defaults(conversation_id, user_id, Utc::now());
        self.store.put_settings(settings.clone()).await?;
        tracing::debug!(conversation_id, user_id, "created default conversation settings");
        Ok(settings)
    }

    /// Applies `patch` and returns the settings before and after the write.
    pub async fn update(
        &self,
        conversation_id: &str,
        user_id: &str,
        patch: &SettingsPatch,
    ) -> Result<(ConversationSettings, ConversationSettings)> {
        let before = self.get_or_create(conversation_id, user_id).await?;
        if patch.is_empty() {
            return Ok((before.clone(), before));
        }

        let mut after = before.clone();
        if let Some(tone) = patch.tone_preference {
            after.tone_preference = tone;
        }
        if let Some(auto_translate) = patch.auto_translate {
            after.auto_translate = auto_translate;
        }
        if let Some(enabled) = patch.smart_replies_enabled {
            after.smart_replies_enabled = enabled;
        }
        after.updated_at = Utc::now();

        self.store.put_settings(after.clone()).await?;
        tracing::info!(
            conversation_id,
            user_id,
            tone = %after.tone_preference,
            enabled = after.smart_replies_enabled,
            "conversation settings updated"
        );
        Ok((before, after))
    }
}

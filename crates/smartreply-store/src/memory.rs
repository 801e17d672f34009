use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use smartreply_schema::{record_key, ConversationMessage, ConversationSettings, SmartReplyRecord};
use tokio::sync::RwLock;

use crate::{MessageStore, ReplyRecordStore, SettingsStore};

#[derive(Default)]
struct Inner {
    messages: HashMap<String, Vec<ConversationMessage>>,
    participants: HashMap<String, BTreeSet<String>>,
    settings: HashMap<String, ConversationSettings>,
    records: HashMap<String, SmartReplyRecord>,
}

/// Process-local store. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.inner.read().await.records.len()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let inner = self.inner.read().await;
        let mut messages = inner
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn insert_message(
        &self,
        conversation_id: &str,
        message: ConversationMessage,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .participants
            .entry(conversation_id.to_string())
            .or_default()
            .insert(message.sender_id.clone());
        let bucket = inner.messages.entry(conversation_id.to_string()).or_default();
        bucket.retain(|m| m.id != message.id);
        bucket.push(message);
        Ok(())
    }

    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .participants
            .get(conversation_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .participants
            .entry(conversation_id.to_string())
            .or_default()
            .insert(user_id.to_string()))
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn get_settings(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<ConversationSettings>> {
        let inner = self.inner.read().await;
        Ok(inner
            .settings
            .get(&record_key(conversation_id, user_id))
            .cloned())
    }

    async fn put_settings(&self, settings: ConversationSettings) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = record_key(&settings.conversation_id, &settings.user_id);
        inner.settings.insert(key, settings);
        Ok(())
    }
}

#[async_trait]
impl ReplyRecordStore for InMemoryStore {
    async fn get_record(&self, key: &str) -> Result<Option<SmartReplyRecord>> {
        Ok(self.inner.read().await.records.get(key).cloned())
    }

    async fn put_record(&self, key: &str, record: SmartReplyRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .records
            .insert(key.to_string(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(id: &str, sender: &str, ts: i64) -> ConversationMessage {
        ConversationMessage::new(id, sender, format!("text {id}"), ts)
    }

    #[tokio::test]
    async fn recent_messages_newest_first_and_limited() {
        let store = InMemoryStore::new();
        store.insert_message("c1", msg("m1", "a", 100)).await.unwrap();
        store.insert_message("c1", msg("m3", "b", 300)).await.unwrap();
        store.insert_message("c1", msg("m2", "a", 200)).await.unwrap();
        store.insert_message("c2", msg("x", "z", 999)).await.unwrap();

        let recent = store.recent_messages("c1", 2).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2"]);
    }

    #[tokio::test]
    async fn insert_registers_sender_as_participant() {
        let store = InMemoryStore::new();
        store.insert_message("c1", msg("m1", "alice", 1)).await.unwrap();
        assert!(store.add_participant("c1", "bob").await.unwrap());
        assert!(!store.add_participant("c1", "alice").await.unwrap());
        assert_eq!(store.participants("c1").await.unwrap(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let store = InMemoryStore::new();
        assert!(store.get_settings("c", "u").await.unwrap().is_none());
        let settings = ConversationSettings::with_defaults("c", "u", Utc::now());
        store.put_settings(settings.clone()).await.unwrap();
        assert_eq!(store.get_settings("c", "u").await.unwrap(), Some(settings));
    }

    #[tokio::test]
    async fn record_put_overwrites() {
        let store = InMemoryStore::new();
        let mut first = SmartReplyRecord::placeholder("c", "u", Utc::now());
        first.replies = vec!["one".into(), "two".into(), "three".into()];
        store.put_record("c_u", first).await.unwrap();

        let mut second = SmartReplyRecord::placeholder("c", "u", Utc::now());
        second.replies = vec!["a".into(), "b".into(), "c".into()];
        store.put_record("c_u", second.clone()).await.unwrap();

        assert_eq!(store.get_record("c_u").await.unwrap(), Some(second));
        assert_eq!(store.record_count().await, 1);
    }
}

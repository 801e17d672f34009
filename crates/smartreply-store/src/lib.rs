//! Storage collaborators for the smart-reply pipeline.
//!
//! The pipeline only ever talks to the three traits below. `SqliteStore` backs a
//! real deployment; `InMemoryStore` backs tests and dry runs.

pub mod memory;
pub mod migrations;
pub mod store;

use anyhow::Result;
use async_trait::async_trait;
use smartreply_schema::{ConversationMessage, ConversationSettings, SmartReplyRecord};

pub use memory::InMemoryStore;
pub use store::SqliteStore;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Up to `limit` messages of a conversation, newest first.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>>;

    /// Stores a message and registers its sender as a participant.
    async fn insert_message(&self, conversation_id: &str, message: ConversationMessage)
        -> Result<()>;

    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>>;

    /// Returns false when the user was already a participant.
    async fn add_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_settings(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<ConversationSettings>>;

    async fn put_settings(&self, settings: ConversationSettings) -> Result<()>;
}

#[async_trait]
pub trait ReplyRecordStore: Send + Sync {
    async fn get_record(&self, key: &str) -> Result<Option<SmartReplyRecord>>;

    /// Unconditional overwrite. The last writer wins.
    async fn put_record(&self, key: &str, record: SmartReplyRecord) -> Result<()>;
}

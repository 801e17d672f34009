use crate::migrations::run_migrations;
use crate::{MessageStore, ReplyRecordStore, SettingsStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use smartreply_schema::{
    record_key, ContextAnalysis, ConversationMessage, ConversationSettings, GeneratedBy,
    SmartReplyRecord, TonePreference,
};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task;

/// SQLite-backed implementation of every store trait.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        run_migrations(&conn)?;
        tracing::debug!(path = %path.display(), "opened reply store");
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let db = Arc::clone(&self.db);
        let conversation_id = conversation_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, text, sender_id, timestamp_ms, language, tone
                FROM messages
                WHERE conversation_id = ?1
                ORDER BY timestamp_ms DESC
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![conversation_id, limit as i64], row_to_message)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<Vec<ConversationMessage>, anyhow::Error>(out)
        })
        .await?
    }

    async fn insert_message(
        &self,
        conversation_id: &str,
        message: ConversationMessage,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        let conversation_id = conversation_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                r#"
                INSERT INTO messages (id, conversation_id, sender_id, text, timestamp_ms, language, tone)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(conversation_id, id) DO UPDATE SET
                    sender_id = excluded.sender_id,
                    text = excluded.text,
                    timestamp_ms = excluded.timestamp_ms,
                    language = excluded.language,
                    tone = excluded.tone
                "#,
                params![
                    message.id,
                    conversation_id,
                    message.sender_id,
                    message.text,
                    message.timestamp_ms,
                    message.language,
                    message.tone,
                ],
            )?;
            tx.execute(
                r#"
                INSERT OR IGNORE INTO participants (conversation_id, user_id, joined_at)
                VALUES (?1, ?2, ?3)
                "#,
                params![conversation_id, message.sender_id, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);
        let conversation_id = conversation_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                "SELECT user_id FROM participants WHERE conversation_id = ?1 ORDER BY user_id",
            )?;
            let rows = stmt.query_map(params![conversation_id], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<Vec<String>, anyhow::Error>(out)
        })
        .await?
    }

    async fn add_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let conversation_id = conversation_id.to_owned();
        let user_id = user_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let inserted = conn.execute(
                r#"
                INSERT OR IGNORE INTO participants (conversation_id, user_id, joined_at)
                VALUES (?1, ?2, ?3)
                "#,
                params![conversation_id, user_id, Utc::now().to_rfc3339()],
            )?;
            Ok::<bool, anyhow::Error>(inserted > 0)
        })
        .await?
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_settings(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<ConversationSettings>> {
        let db = Arc::clone(&self.db);
        let key = record_key(conversation_id, user_id);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let settings = conn
                .query_row(
                    r#"
                    SELECT id, conversation_id, user_id, tone_preference, auto_translate,
                           smart_replies_enabled, updated_at
                    FROM conversation_settings
                    WHERE id = ?1
                    "#,
                    params![key],
                    row_to_settings,
                )
                .optional()?;
            Ok::<Option<ConversationSettings>, anyhow::Error>(settings)
        })
        .await?
    }

    async fn put_settings(&self, settings: ConversationSettings) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO conversation_settings (
                    id, conversation_id, user_id, tone_preference, auto_translate,
                    smart_replies_enabled, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO UPDATE SET
                    tone_preference = excluded.tone_preference,
                    auto_translate = excluded.auto_translate,
                    smart_replies_enabled = excluded.smart_replies_enabled,
                    updated_at = excluded.updated_at
                "#,
                params![
                    record_key(&settings.conversation_id, &settings.user_id),
                    settings.conversation_id,
                    settings.user_id,
                    settings.tone_preference.as_str(),
                    settings.auto_translate,
                    settings.smart_replies_enabled,
                    settings.updated_at.to_rfc3339(),
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

#[async_trait]
impl ReplyRecordStore for SqliteStore {
    async fn get_record(&self, key: &str) -> Result<Option<SmartReplyRecord>> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let record = conn
                .query_row(
                    r#"
                    SELECT key, conversation_id, user_id, replies, context_analysis,
                           generated_at, expires_at, generated_by
                    FROM smart_replies
                    WHERE key = ?1
                    "#,
                    params![key],
                    row_to_record,
                )
                .optional()?;
            Ok::<Option<SmartReplyRecord>, anyhow::Error>(record)
        })
        .await?
    }

    async fn put_record(&self, key: &str, record: SmartReplyRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        task::spawn_blocking(move || {
            let replies = serde_json::to_string(&record.replies)?;
            let analysis = serde_json::to_string(&record.context_analysis)?;
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO smart_replies (
                    key, conversation_id, user_id, replies, context_analysis,
                    generated_at, expires_at, generated_by
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(key) DO UPDATE SET
                    conversation_id = excluded.conversation_id,
                    user_id = excluded.user_id,
                    replies = excluded.replies,
                    context_analysis = excluded.context_analysis,
                    generated_at = excluded.generated_at,
                    expires_at = excluded.expires_at,
                    generated_by = excluded.generated_by
                "#,
                params![
                    key,
                    record.conversation_id,
                    record.user_id,
                    replies,
                    analysis,
                    record.generated_at.to_rfc3339(),
                    record.expires_at.map(|t| t.to_rfc3339()),
                    record.generated_by.as_str(),
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

fn conversion_error<E>(err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_datetime_sql(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(conversion_error)
}

fn parse_tone_preference(raw: &str) -> TonePreference {
    raw.parse().unwrap_or_default()
}

fn parse_generated_by(raw: &str) -> GeneratedBy {
    match raw {
        "manual" => GeneratedBy::Manual,
        _ => GeneratedBy::Auto,
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ConversationMessage> {
    Ok(ConversationMessage {
        id: row.get(0)?,
        text: row.get(1)?,
        sender_id: row.get(2)?,
        timestamp_ms: row.get(3)?,
        language: row.get(4)?,
        tone: row.get(5)?,
    })
}

fn row_to_settings(row: &Row<'_>) -> rusqlite::Result<ConversationSettings> {
    let tone_raw: String = row.get(3)?;
    let updated_at_raw: String = row.get(6)?;
    Ok(ConversationSettings {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_id: row.get(2)?,
        tone_preference: parse_tone_preference(&tone_raw),
        auto_translate: row.get(4)?,
        smart_replies_enabled: row.get(5)?,
        updated_at: parse_datetime_sql(&updated_at_raw)?,
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<SmartReplyRecord> {
    let replies_raw: String = row.get(3)?;
    let analysis_raw: String = row.get(4)?;
    let generated_at_raw: String = row.get(5)?;
    let expires_at_raw: Option<String> = row.get(6)?;
    let generated_by_raw: String = row.get(7)?;

    let replies: Vec<String> = serde_json::from_str(&replies_raw).map_err(conversion_error)?;
    let context_analysis: ContextAnalysis =
        serde_json::from_str(&analysis_raw).map_err(conversion_error)?;
    let expires_at = match expires_at_raw {
        Some(raw) => Some(parse_datetime_sql(&raw)?),
        None => None,
    };

    Ok(SmartReplyRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_id: row.get(2)?,
        replies,
        context_analysis,
        generated_at: parse_datetime_sql(&generated_at_raw)?,
        expires_at,
        generated_by: parse_generated_by(&generated_by_raw),
    })
}

use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashSet;

type Migration = (i64, &'static str);

fn migrations() -> Vec<Migration> {
    vec![
        (
            1,
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                language TEXT,
                tone TEXT,
                PRIMARY KEY (conversation_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
                ON messages(conversation_id, timestamp_ms DESC);
            "#,
        ),
        (
            2,
            r#"
            CREATE TABLE IF NOT EXISTS participants (
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );
            "#,
        ),
        (
            3,
            r#"
            CREATE TABLE IF NOT EXISTS conversation_settings (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                tone_preference TEXT NOT NULL,
                auto_translate INTEGER NOT NULL,
                smart_replies_enabled INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        ),
        (
            4,
            r#"
            CREATE TABLE IF NOT EXISTS smart_replies (
                key TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                replies TEXT NOT NULL,
                context_analysis TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                expires_at TEXT,
                generated_by TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_smart_replies_conversation
                ON smart_replies(conversation_id);
            "#,
        ),
    ]
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS __schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )?;

    let mut stmt = conn.prepare("SELECT version FROM __schema_version")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    let mut applied = HashSet::new();
    for row in rows {
        applied.insert(row?);
    }

    for (version, sql) in migrations() {
        if applied.contains(&version) {
            continue;
        }

        tracing::debug!(version, "applying store migration");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO __schema_version(version, applied_at) VALUES (?1, datetime('now'))",
            [version],
        )?;
        tx.commit()?;
    }

    Ok(())
}

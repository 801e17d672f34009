use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use smartreply_schema::{record_key, SmartReplyRecord};
use smartreply_store::ReplyRecordStore;

/// Expiring view over the reply record store.
#[derive(Clone)]
pub struct SmartReplyCache {
    store: Arc<dyn ReplyRecordStore>,
    expiration: TimeDelta,
}

impl SmartReplyCache {
    pub fn new(store: Arc<dyn ReplyRecordStore>, expiration: TimeDelta) -> Self {
        Self { store, expiration }
    }

    pub fn expiration(&self) -> TimeDelta {
        self.expiration
    }

    /// Stored record for the pair, expired or not.
    pub async fn get(&self, conversation_id: &str, user_id: &str) -> Result<Option<SmartReplyRecord>> {
        self.store.get_record(&record_key(conversation_id, user_id)).await
    }

    /// Overwrites whatever is stored under the record's key.
    pub async fn put(&self, record: SmartReplyRecord) -> Result<()> {
        let key = record_key(&record.conversation_id, &record.user_id);
        self.store.put_record(&key, record).await
    }

    /// A record without `expires_at` lives for the configured expiration from
    /// `generated_at`.
    pub fn is_expired(&self, record: &SmartReplyRecord, now: DateTime<Utc>) -> bool {
        let deadline = record
            .expires_at
            .unwrap_or(record.generated_at + self.expiration);
        now > deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartreply_store::InMemoryStore;

    fn cache() -> SmartReplyCache {
        SmartReplyCache::new(Arc::new(InMemoryStore::new()), TimeDelta::milliseconds(300_000))
    }

    fn record(generated_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> SmartReplyRecord {
        let mut record = SmartReplyRecord::placeholder("c", "u", generated_at);
        record.replies = vec!["a".into(), "b".into(), "c".into()];
        record.expires_at = expires_at;
        record
    }

    #[test]
    fn ten_minute_old_record_is_expired() {
        let now = Utc::now();
        let stale = record(now - TimeDelta::minutes(10), None);
        assert!(cache().is_expired(&stale, now));
    }

    #[test]
    fn fresh_record_without_expiry_uses_configured_window() {
        let now = Utc::now();
        let fresh = record(now - TimeDelta::minutes(4), None);
        assert!(!cache().is_expired(&fresh, now));
    }

    #[test]
    fn explicit_expiry_wins_over_window() {
        let now = Utc::now();
        let cache = cache();
        let short = record(now - TimeDelta::seconds(10), Some(now - TimeDelta::seconds(1)));
        assert!(cache.is_expired(&short, now));

        let long = record(now - TimeDelta::hours(2), Some(now + TimeDelta::minutes(1)));
        assert!(!cache.is_expired(&long, now));

        let boundary = record(now - TimeDelta::minutes(1), Some(now));
        assert!(!cache.is_expired(&boundary, now));
    }

    #[tokio::test]
    async fn put_then_get_by_pair() {
        let cache = cache();
        let now = Utc::now();
        cache.put(record(now, Some(now + TimeDelta::minutes(5)))).await.unwrap();
        let loaded = cache.get("c", "u").await.unwrap().unwrap();
        assert_eq!(loaded.replies, vec!["a", "b", "c"]);
        assert!(cache.get("c", "other").await.unwrap().is_none());
    }
}

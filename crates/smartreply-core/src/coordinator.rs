use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use smartreply_bus::BusPublisher;
use smartreply_provider::LlmProvider;
use smartreply_schema::{
    record_key, BusMessage, ContextAnalysis, ConversationSettings, GenerateOptions, GeneratedBy,
    GenerationOutcome, SmartReplyRecord,
};
use smartreply_store::{MessageStore, ReplyRecordStore, SettingsStore};

use crate::analyzer::ContextAnalysisService;
use crate::cache::SmartReplyCache;
use crate::config::{validate_config, PipelineConfig};
use crate::error::PipelineError;
use crate::key_lock::KeyLockManager;
use crate::pipeline::{PipelineOrchestrator, PipelineRequest, PipelineRun};
use crate::postprocess::greeting_replies;
use crate::settings::SettingsManager;

/// Outcome plus the diagnostics of the last pipeline run, if one happened.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub outcome: GenerationOutcome,
    pub run: Option<PipelineRun>,
}

enum Completed {
    Disabled,
    CacheHit(SmartReplyRecord),
    Greeting(SmartReplyRecord),
    Generated(SmartReplyRecord),
}

/// Entry point for producing smart replies for one (conversation, user) pair.
pub struct GenerationCoordinator {
    config: PipelineConfig,
    settings: SettingsManager,
    messages: Arc<dyn MessageStore>,
    cache: SmartReplyCache,
    orchestrator: PipelineOrchestrator,
    publisher: Option<BusPublisher>,
    key_locks: Option<KeyLockManager>,
}

impl GenerationCoordinator {
    pub fn new(
        config: PipelineConfig,
        provider: Arc<dyn LlmProvider>,
        messages: Arc<dyn MessageStore>,
        settings: Arc<dyn SettingsStore>,
        records: Arc<dyn ReplyRecordStore>,
    ) -> Self {
        let config = validate_config(config);
        let key_locks = config.serialize_per_key.then(KeyLockManager::new);
        Self {
            settings: SettingsManager::new(settings),
            messages,
            cache: SmartReplyCache::new(records, config.cache_expiration()),
            orchestrator: PipelineOrchestrator::new(&config, provider),
            publisher: None,
            key_locks,
            config,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ContextAnalysisService>) -> Self {
        self.orchestrator = self.orchestrator.with_analyzer(analyzer);
        self
    }

    pub fn with_publisher(mut self, publisher: BusPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_key_locks(mut self, locks: KeyLockManager) -> Self {
        self.key_locks = Some(locks);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn settings(&self) -> &SettingsManager {
        &self.settings
    }

    pub fn cache(&self) -> &SmartReplyCache {
        &self.cache
    }

    pub async fn generate_smart_replies(
        &self,
        conversation_id: &str,
        user_id: &str,
        options: GenerateOptions,
    ) -> GenerationOutcome {
        self.generate_detailed(conversation_id, user_id, options)
            .await
            .outcome
    }

    /// Runs the whole settings, cache, retrieval, pipeline and persist
    /// sequence, retrying all of it on failure.
    pub async fn generate_detailed(
        &self,
        conversation_id: &str,
        user_id: &str,
        options: GenerateOptions,
    ) -> GenerationReport {
        let started = Instant::now();
        if options.is_own_message(user_id) {
            tracing::debug!(conversation_id, user_id, "message authored by user, skipping");
            return GenerationReport {
                outcome: GenerationOutcome {
                    success: true,
                    smart_replies: None,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    cache_hit: false,
                    error: None,
                },
                run: None,
            };
        }

        let _guard = match &self.key_locks {
            Some(locks) => Some(locks.acquire(&record_key(conversation_id, user_id)).await),
            None => None,
        };

        let max_attempts = options.max_retries.unwrap_or(self.config.max_retries).max(1);
        let mut last_run = None;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self
                .attempt(conversation_id, user_id, &options, &mut last_run)
                .await
            {
                Ok(completed) => {
                    let outcome = self
                        .complete(conversation_id, user_id, completed, started)
                        .await;
                    return GenerationReport {
                        outcome,
                        run: last_run,
                    };
                }
                Err(err) => {
                    if attempt < max_attempts {
                        let delay = self.backoff(attempt);
                        tracing::warn!(
                            conversation_id,
                            user_id,
                            attempt,
                            max_attempts,
                            stage = err.stage_name(),
                            delay_ms = delay.as_millis() as u64,
                            "smart reply generation failed, retrying: {err}"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "smart reply generation failed".to_string());
        tracing::error!(
            conversation_id,
            user_id,
            attempts = max_attempts,
            "smart reply generation exhausted retries: {error}"
        );
        self.publish(BusMessage::GenerationFailed {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            error: error.clone(),
        })
        .await;

        GenerationReport {
            outcome: GenerationOutcome {
                success: false,
                smart_replies: None,
                processing_time_ms: started.elapsed().as_millis() as u64,
                cache_hit: false,
                error: Some(error),
            },
            run: last_run,
        }
    }

    /// `2^attempt` times the base delay, so 2s then 4s with the default base.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.config.retry_base_delay_ms.saturating_mul(factor))
    }

    async fn attempt(
        &self,
        conversation_id: &str,
        user_id: &str,
        options: &GenerateOptions,
        last_run: &mut Option<PipelineRun>,
    ) -> Result<Completed, PipelineError> {
        let settings = self
            .settings
            .get_or_create(conversation_id, user_id)
            .await
            .map_err(|e| PipelineError::Settings(e.to_string()))?;
        if !settings.smart_replies_enabled {
            return Ok(Completed::Disabled);
        }

        if !options.force_refresh {
            let cached = self
                .cache
                .get(conversation_id, user_id)
                .await
                .map_err(|e| PipelineError::stage("check_cache", e.to_string()))?;
            if let Some(record) = cached {
                if !self.cache.is_expired(&record, Utc::now()) {
                    return Ok(Completed::CacheHit(record));
                }
            }
        }

        let generated_by = if options.force_refresh {
            GeneratedBy::Manual
        } else {
            GeneratedBy::Auto
        };

        let messages = self
            .messages
            .recent_messages(conversation_id, self.config.max_messages)
            .await
            .map_err(|e| PipelineError::Retrieval(e.to_string()))?;
        if messages.is_empty() {
            let record = self.greeting_record(&settings, generated_by);
            self.persist(record.clone()).await?;
            return Ok(Completed::Greeting(record));
        }

        let run = self
            .orchestrator
            .run(PipelineRequest {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
                messages,
                settings,
                target_language: options.target_language.clone(),
                generated_by,
            })
            .await;
        let result = if run.success {
            Ok(run.record.clone())
        } else {
            Err(PipelineError::stage(
                "run_pipeline",
                run.error.clone().unwrap_or_default(),
            ))
        };
        *last_run = Some(run);
        let record = result?;

        self.persist(record.clone()).await?;
        Ok(Completed::Generated(record))
    }

    fn greeting_record(
        &self,
        settings: &ConversationSettings,
        generated_by: GeneratedBy,
    ) -> SmartReplyRecord {
        let now = Utc::now();
        SmartReplyRecord {
            id: record_key(&settings.conversation_id, &settings.user_id),
            conversation_id: settings.conversation_id.clone(),
            user_id: settings.user_id.clone(),
            replies: greeting_replies(settings.tone_preference),
            context_analysis: ContextAnalysis::empty(now),
            generated_at: now,
            expires_at: Some(now + self.cache.expiration()),
            generated_by,
        }
    }

    async fn persist(&self, record: SmartReplyRecord) -> Result<(), PipelineError> {
        self.cache
            .put(record)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))
    }

    async fn complete(
        &self,
        conversation_id: &str,
        user_id: &str,
        completed: Completed,
        started: Instant,
    ) -> GenerationOutcome {
        let (record, cache_hit) = match completed {
            Completed::Disabled => {
                tracing::debug!(conversation_id, user_id, "smart replies disabled, skipping");
                (None, false)
            }
            Completed::CacheHit(record) => {
                tracing::info!(conversation_id, user_id, "serving cached smart replies");
                (Some(record), true)
            }
            Completed::Greeting(record) => {
                tracing::info!(conversation_id, user_id, "empty conversation, stored greeting replies");
                (Some(record), false)
            }
            Completed::Generated(record) => {
                tracing::info!(
                    conversation_id,
                    user_id,
                    generated_by = record.generated_by.as_str(),
                    "stored new smart replies"
                );
                (Some(record), false)
            }
        };

        if let Some(record) = &record {
            self.publish(BusMessage::RepliesReady {
                record: record.clone(),
                cache_hit,
            })
            .await;
        }

        GenerationOutcome {
            success: true,
            smart_replies: record,
            processing_time_ms: started.elapsed().as_millis() as u64,
            cache_hit,
            error: None,
        }
    }

    async fn publish(&self, msg: BusMessage) {
        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(msg).await {
                tracing::warn!("failed to publish generation event: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartreply_provider::{StubProvider, STUB_REPLIES};
    use smartreply_schema::{ConversationMessage, TonePreference};
    use smartreply_store::InMemoryStore;

    fn coordinator(store: &InMemoryStore) -> GenerationCoordinator {
        let store = Arc::new(store.clone());
        GenerationCoordinator::new(
            PipelineConfig::default(),
            Arc::new(StubProvider),
            store.clone(),
            store.clone(),
            store,
        )
    }

    #[test]
    fn backoff_doubles_from_base() {
        let coordinator = coordinator(&InMemoryStore::new());
        assert_eq!(coordinator.backoff(1), Duration::from_millis(2000));
        assert_eq!(coordinator.backoff(2), Duration::from_millis(4000));
        assert_eq!(coordinator.backoff(3), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn generated_record_is_persisted_and_then_served_from_cache() {
        let store = InMemoryStore::new();
        let now = Utc::now().timestamp_millis();
        store
            .insert_message("c1", ConversationMessage::new("m1", "bob", "Lunch today?", now))
            .await
            .unwrap();
        let coordinator = coordinator(&store);

        let first = coordinator
            .generate_smart_replies("c1", "alice", GenerateOptions::default())
            .await;
        assert!(first.success);
        assert!(!first.cache_hit);
        let record = first.smart_replies.unwrap();
        assert_eq!(record.replies, STUB_REPLIES.to_vec());
        assert_eq!(record.generated_by, GeneratedBy::Auto);

        let second = coordinator
            .generate_smart_replies("c1", "alice", GenerateOptions::default())
            .await;
        assert!(second.cache_hit);
        assert_eq!(second.smart_replies.unwrap().replies, record.replies);
    }

    #[tokio::test]
    async fn disabled_settings_short_circuit() {
        let store = InMemoryStore::new();
        let mut settings = ConversationSettings::with_defaults("c1", "alice", Utc::now());
        settings.smart_replies_enabled = false;
        store.put_settings(settings).await.unwrap();
        let coordinator = coordinator(&store);

        let outcome = coordinator
            .generate_smart_replies("c1", "alice", GenerateOptions::forced())
            .await;
        assert!(outcome.success);
        assert!(!outcome.cache_hit);
        assert!(outcome.smart_replies.is_none());
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn forced_greeting_is_tagged_manual() {
        let store = InMemoryStore::new();
        let mut settings = ConversationSettings::with_defaults("c1", "alice", Utc::now());
        settings.tone_preference = TonePreference::Formal;
        store.put_settings(settings).await.unwrap();
        let coordinator = coordinator(&store);

        let report = coordinator
            .generate_detailed("c1", "alice", GenerateOptions::forced())
            .await;
        let record = report.outcome.smart_replies.unwrap();
        assert_eq!(record.replies, greeting_replies(TonePreference::Formal));
        assert_eq!(record.generated_by, GeneratedBy::Manual);
        assert!(report.run.is_none());
    }

    #[tokio::test]
    async fn own_message_generates_nothing() {
        let store = InMemoryStore::new();
        store
            .insert_message(
                "c1",
                ConversationMessage::new("m1", "alice", "See you at noon", Utc::now().timestamp_millis()),
            )
            .await
            .unwrap();
        let coordinator = coordinator(&store);

        let outcome = coordinator
            .generate_smart_replies("c1", "alice", GenerateOptions::forced().with_sender("alice"))
            .await;
        assert!(outcome.success);
        assert!(!outcome.cache_hit);
        assert!(outcome.smart_replies.is_none());
        assert_eq!(store.record_count().await, 0);

        let outcome = coordinator
            .generate_smart_replies("c1", "bob", GenerateOptions::forced().with_sender("alice"))
            .await;
        assert_eq!(outcome.smart_replies.unwrap().replies, STUB_REPLIES.to_vec());
    }
}

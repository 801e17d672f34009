use std::sync::Arc;

use anyhow::{anyhow, Result};
use smartreply_bus::{EventBus, Topic};
use smartreply_schema::{BusMessage, GenerateOptions, GenerationOutcome, GenerationTrigger};
use smartreply_store::MessageStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::coordinator::GenerationCoordinator;
use crate::settings::requires_regeneration;

/// Turns external events into independent generation tasks.
pub struct TriggerDispatcher {
    coordinator: Arc<GenerationCoordinator>,
    messages: Arc<dyn MessageStore>,
}

impl TriggerDispatcher {
    pub fn new(coordinator: Arc<GenerationCoordinator>, messages: Arc<dyn MessageStore>) -> Self {
        Self {
            coordinator,
            messages,
        }
    }

    /// Spawns one task per (conversation, user) that needs new replies.
    pub async fn handle(&self, trigger: GenerationTrigger) -> Result<Vec<JoinHandle<GenerationOutcome>>> {
        tracing::debug!(
            kind = trigger.kind(),
            conversation_id = trigger.conversation_id(),
            "handling generation trigger"
        );

        let handles = match trigger {
            GenerationTrigger::NewMessage {
                conversation_id,
                sender_id,
            } => self
                .messages
                .participants(&conversation_id)
                .await?
                .into_iter()
                .filter(|user_id| *user_id != sender_id)
                .map(|user_id| {
                    self.spawn(
                        conversation_id.clone(),
                        user_id,
                        GenerateOptions::forced().with_sender(sender_id.clone()),
                    )
                })
                .collect(),
            GenerationTrigger::SettingsChanged { before, after } => {
                if requires_regeneration(&before, &after) && after.smart_replies_enabled {
                    vec![self.spawn(after.conversation_id, after.user_id, GenerateOptions::forced())]
                } else {
                    Vec::new()
                }
            }
            GenerationTrigger::ParticipantAdded {
                conversation_id,
                user_id,
            } => {
                self.messages.add_participant(&conversation_id, &user_id).await?;
                vec![self.spawn(conversation_id, user_id, GenerateOptions::default())]
            }
            GenerationTrigger::ManualRefresh {
                conversation_id,
                user_id,
                target_language,
            } => {
                let mut options = GenerateOptions::forced();
                options.target_language = target_language;
                vec![self.spawn(conversation_id, user_id, options)]
            }
        };
        Ok(handles)
    }

    /// Handles a trigger and waits for every task it started.
    pub async fn handle_and_wait(&self, trigger: GenerationTrigger) -> Result<Vec<GenerationOutcome>> {
        let mut outcomes = Vec::new();
        for handle in self.handle(trigger).await? {
            outcomes.push(handle.await.map_err(|e| anyhow!("generation task failed: {e}"))?);
        }
        Ok(outcomes)
    }

    fn spawn(
        &self,
        conversation_id: String,
        user_id: String,
        options: GenerateOptions,
    ) -> JoinHandle<GenerationOutcome> {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .generate_smart_replies(&conversation_id, &user_id, options)
                .await
        })
    }

    /// Consumes `GenerationRequested` messages until the channel closes.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<BusMessage>) {
        while let Some(msg) = rx.recv().await {
            let BusMessage::GenerationRequested { trigger } = msg else {
                continue;
            };
            let kind = trigger.kind();
            match self.handle(trigger).await {
                Ok(handles) => tracing::debug!(kind, tasks = handles.len(), "generation trigger dispatched"),
                Err(e) => tracing::warn!(kind, "failed to dispatch generation trigger: {e}"),
            }
        }
    }

    pub async fn subscribe(self: Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let rx = bus.subscribe(Topic::GenerationRequested).await;
        tokio::spawn(self.run(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use chrono::Utc;
    use smartreply_provider::StubProvider;
    use smartreply_schema::{ConversationMessage, ConversationSettings, GeneratedBy, TonePreference};
    use smartreply_store::{InMemoryStore, ReplyRecordStore};

    fn dispatcher(store: &InMemoryStore) -> TriggerDispatcher {
        let shared = Arc::new(store.clone());
        let coordinator = GenerationCoordinator::new(
            PipelineConfig::default(),
            Arc::new(StubProvider),
            shared.clone(),
            shared.clone(),
            shared.clone(),
        );
        TriggerDispatcher::new(Arc::new(coordinator), shared)
    }

    async fn seed(store: &InMemoryStore) {
        let now = Utc::now().timestamp_millis();
        store
            .insert_message("c1", ConversationMessage::new("m1", "alice", "Hi all", now - 1000))
            .await
            .unwrap();
        store
            .insert_message("c1", ConversationMessage::new("m2", "bob", "Hey alice", now))
            .await
            .unwrap();
        store.add_participant("c1", "carol").await.unwrap();
    }

    #[tokio::test]
    async fn new_message_regenerates_for_everyone_but_sender() {
        let store = InMemoryStore::new();
        seed(&store).await;
        let dispatcher = dispatcher(&store);

        let outcomes = dispatcher
            .handle_and_wait(GenerationTrigger::NewMessage {
                conversation_id: "c1".into(),
                sender_id: "bob".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));
        assert!(store.get_record("c1_alice").await.unwrap().is_some());
        assert!(store.get_record("c1_carol").await.unwrap().is_some());
        assert!(store.get_record("c1_bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settings_change_without_relevant_delta_is_ignored() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(&store);
        let before = ConversationSettings::with_defaults("c1", "alice", Utc::now());
        let mut after = before.clone();
        after.auto_translate = true;

        let handles = dispatcher
            .handle(GenerationTrigger::SettingsChanged {
                before: before.clone(),
                after,
            })
            .await
            .unwrap();
        assert!(handles.is_empty());

        let mut disabled = before.clone();
        disabled.smart_replies_enabled = false;
        let handles = dispatcher
            .handle(GenerationTrigger::SettingsChanged {
                before,
                after: disabled,
            })
            .await
            .unwrap();
        assert!(handles.is_empty());
    }

    #[tokio::test]
    async fn tone_change_forces_regeneration() {
        let store = InMemoryStore::new();
        seed(&store).await;
        let dispatcher = dispatcher(&store);
        let before = ConversationSettings::with_defaults("c1", "alice", Utc::now());
        let mut after = before.clone();
        after.tone_preference = TonePreference::Casual;

        let outcomes = dispatcher
            .handle_and_wait(GenerationTrigger::SettingsChanged { before, after })
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        let record = outcomes[0].smart_replies.clone().unwrap();
        assert_eq!(record.generated_by, GeneratedBy::Manual);
    }

    #[tokio::test]
    async fn participant_added_is_registered() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(&store);

        let outcomes = dispatcher
            .handle_and_wait(GenerationTrigger::ParticipantAdded {
                conversation_id: "c2".into(),
                user_id: "dave".into(),
            })
            .await
            .unwrap();
        assert_eq!(store.participants("c2").await.unwrap(), vec!["dave".to_string()]);
        let record = outcomes[0].smart_replies.clone().unwrap();
        assert_eq!(record.generated_by, GeneratedBy::Auto);
    }

    #[tokio::test]
    async fn bus_requests_are_dispatched() {
        let store = InMemoryStore::new();
        seed(&store).await;
        let bus = EventBus::new(8);
        let mut ready = bus.subscribe(Topic::RepliesReady).await;
        let shared = Arc::new(store.clone());
        let coordinator = GenerationCoordinator::new(
            PipelineConfig::default(),
            Arc::new(StubProvider),
            shared.clone(),
            shared.clone(),
            shared.clone(),
        )
        .with_publisher(bus.publisher());
        let dispatcher = Arc::new(TriggerDispatcher::new(Arc::new(coordinator), shared));
        let _task = dispatcher.subscribe(&bus).await;

        bus.publish(BusMessage::GenerationRequested {
            trigger: GenerationTrigger::ManualRefresh {
                conversation_id: "c1".into(),
                user_id: "alice".into(),
                target_language: Some("es".into()),
            },
        })
        .await
        .unwrap();

        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), ready.recv())
            .await
            .unwrap()
            .unwrap();
        match msg {
            BusMessage::RepliesReady { record, cache_hit } => {
                assert!(!cache_hit);
                assert_eq!(record.user_id, "alice");
                assert_eq!(record.replies.len(), 3);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use smartreply_provider::LlmProvider;
use smartreply_schema::{
    record_key, ContextAnalysis, ConversationMessage, ConversationSettings, GeneratedBy,
    PipelineStepRecord, SmartReplyRecord,
};

use crate::analyzer::{AnalysisResult, ContextAnalysisService};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::generator::ReplyGenerator;
use crate::heuristics::HeuristicContextAnalyzer;
use crate::postprocess::post_process;
use crate::prompt::PromptAugmenter;

/// Everything one pipeline run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub conversation_id: String,
    pub user_id: String,
    pub messages: Vec<ConversationMessage>,
    pub settings: ConversationSettings,
    pub target_language: Option<String>,
    pub generated_by: GeneratedBy,
}

/// Result and diagnostics of one run. `record` is a placeholder with no
/// replies when `success` is false and must not be persisted.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub success: bool,
    pub record: SmartReplyRecord,
    pub steps: Vec<PipelineStepRecord>,
    pub total_duration_ms: u64,
    pub analysis_degraded: bool,
    pub generation_degraded: bool,
    pub error: Option<String>,
}

struct StepClock {
    name: &'static str,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl StepClock {
    fn start(name: &'static str) -> Self {
        Self {
            name,
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    fn finish(self, steps: &mut Vec<PipelineStepRecord>, error: Option<&PipelineError>) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        tracing::debug!(stage = self.name, duration_ms, success = error.is_none(), "pipeline stage finished");
        steps.push(PipelineStepRecord {
            name: self.name.to_string(),
            start_time: self.start_time,
            end_time: Utc::now(),
            duration_ms,
            success: error.is_none(),
            error: error.map(|e| e.to_string()),
        });
    }
}

pub struct PipelineOrchestrator {
    max_messages: usize,
    expiration: TimeDelta,
    analyzer: Option<Arc<dyn ContextAnalysisService>>,
    augmenter: PromptAugmenter,
    generator: ReplyGenerator,
}

impl PipelineOrchestrator {
    /// `config` is expected to be validated already.
    pub fn new(config: &PipelineConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            max_messages: config.max_messages,
            expiration: config.cache_expiration(),
            analyzer: None,
            augmenter: PromptAugmenter::new(config.context_window_size),
            generator: ReplyGenerator::new(
                provider,
                config.model.clone(),
                config.temperature,
                config.max_tokens,
            ),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ContextAnalysisService>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub async fn run(&self, request: PipelineRequest) -> PipelineRun {
        let started = Instant::now();
        let mut steps = Vec::new();
        let mut analysis_degraded = false;
        let mut generation_degraded = false;

        let result = self
            .run_stages(
                &request,
                &mut steps,
                &mut analysis_degraded,
                &mut generation_degraded,
            )
            .await;
        let total_duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(record) => PipelineRun {
                success: true,
                record,
                steps,
                total_duration_ms,
                analysis_degraded,
                generation_degraded,
                error: None,
            },
            Err(err) => {
                tracing::warn!(
                    conversation_id = %request.conversation_id,
                    user_id = %request.user_id,
                    stage = err.stage_name(),
                    "pipeline aborted: {err}"
                );
                PipelineRun {
                    success: false,
                    record: SmartReplyRecord::placeholder(
                        &request.conversation_id,
                        &request.user_id,
                        Utc::now(),
                    ),
                    steps,
                    total_duration_ms,
                    analysis_degraded,
                    generation_degraded,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn run_stages(
        &self,
        request: &PipelineRequest,
        steps: &mut Vec<PipelineStepRecord>,
        analysis_degraded: &mut bool,
        generation_degraded: &mut bool,
    ) -> Result<SmartReplyRecord, PipelineError> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        let clock = StepClock::start("retrieval");
        let messages = match self.select_messages(&request.messages) {
            Ok(messages) => {
                clock.finish(steps, None);
                messages
            }
            Err(err) => {
                clock.finish(steps, Some(&err));
                return Err(err);
            }
        };

        let clock = StepClock::start("analysis");
        let (analysis, degraded) = self.analyze(&messages, &request.settings, now_ms).await;
        *analysis_degraded = degraded;
        clock.finish(steps, None);

        let clock = StepClock::start("augmentation");
        let prompt = self.augmenter.build(
            &messages,
            &analysis.summary,
            &request.settings,
            request.target_language.as_deref(),
        );
        clock.finish(steps, None);

        let clock = StepClock::start("generation");
        let generated = self.generator.generate(&prompt).await;
        *generation_degraded = generated.degraded;
        clock.finish(steps, None);

        let clock = StepClock::start("post_processing");
        let replies = post_process(&generated.replies, &request.settings);
        clock.finish(steps, None);

        let clock = StepClock::start("packaging");
        let record = SmartReplyRecord {
            id: record_key(&request.conversation_id, &request.user_id),
            conversation_id: request.conversation_id.clone(),
            user_id: request.user_id.clone(),
            replies,
            context_analysis: ContextAnalysis::from_summary(&analysis.summary, analysis.entities, now),
            generated_at: now,
            expires_at: Some(now + self.expiration),
            generated_by: request.generated_by,
        };
        if !record.is_deliverable() {
            let err = PipelineError::stage("packaging", "record does not hold three valid replies");
            clock.finish(steps, Some(&err));
            return Err(err);
        }
        clock.finish(steps, None);

        Ok(record)
    }

    /// Newest first, capped at `max_messages`, regardless of caller order.
    fn select_messages(
        &self,
        messages: &[ConversationMessage],
    ) -> Result<Vec<ConversationMessage>, PipelineError> {
        if messages.is_empty() {
            return Err(PipelineError::stage("retrieval", "no messages to analyze"));
        }
        let mut selected = messages.to_vec();
        selected.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        selected.truncate(self.max_messages);
        Ok(selected)
    }

    /// Service result when it answers, heuristic result for the whole stage
    /// otherwise.
    async fn analyze(
        &self,
        messages: &[ConversationMessage],
        settings: &ConversationSettings,
        now_ms: i64,
    ) -> (AnalysisResult, bool) {
        let Some(service) = &self.analyzer else {
            return (HeuristicContextAnalyzer.analyze(messages, now_ms), false);
        };
        match service.analyze(messages, settings, now_ms).await {
            Ok(result) => (result, false),
            Err(e) => {
                tracing::warn!(
                    conversation_id = %settings.conversation_id,
                    "context analysis unavailable, using heuristics: {e}"
                );
                (HeuristicContextAnalyzer.analyze(messages, now_ms), true)
            }
        }
    }
}

use thiserror::Error;

/// Failures that abort a coordinator attempt and send it round the retry loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline stage {stage} failed: {message}")]
    Stage { stage: String, message: String },
    #[error("failed to persist smart replies: {0}")]
    Persistence(String),
    #[error("failed to load conversation settings: {0}")]
    Settings(String),
    #[error("failed to retrieve messages: {0}")]
    Retrieval(String),
}

impl PipelineError {
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Name used in logs and step records.
    pub fn stage_name(&self) -> &str {
        match self {
            Self::Stage { stage, .. } => stage,
            Self::Persistence(_) => "persist",
            Self::Settings(_) => "check_settings",
            Self::Retrieval(_) => "retrieve_messages",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_message_names_stage() {
        let err = PipelineError::stage("packaging", "replies missing");
        assert_eq!(err.to_string(), "pipeline stage packaging failed: replies missing");
        assert_eq!(err.stage_name(), "packaging");
    }

    #[test]
    fn collaborator_errors_map_to_coordinator_states() {
        assert_eq!(
            PipelineError::Settings("db down".into()).stage_name(),
            "check_settings"
        );
        assert_eq!(
            PipelineError::Retrieval("timeout".into()).to_string(),
            "failed to retrieve messages: timeout"
        );
    }
}

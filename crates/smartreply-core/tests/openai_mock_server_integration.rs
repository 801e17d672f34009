use std::sync::Arc;

use chrono::Utc;
use smartreply_core::*;
use smartreply_provider::OpenAiProvider;
use smartreply_schema::{ConversationMessage, GenerateOptions, Sentiment};
use smartreply_store::{InMemoryStore, MessageStore};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_openai_response(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": {"content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 40, "completion_tokens": 12}
    })
}

fn mock_openai_error(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(serde_json::json!({
        "error": {
            "type": "api_error",
            "message": message
        }
    }))
}

const ANALYSIS_JSON: &str = r#"{
    "contextAnalysis": {
        "topics": ["food"],
        "sentiment": "positive",
        "keyEntities": ["Lucía"],
        "conversationTone": "casual",
        "language": "es"
    },
    "relevanceScores": [{"messageId": "m1", "score": 0.8}],
    "entityRecognition": ["Lucía", "Madrid"]
}"#;

async fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store
        .insert_message(
            "c1",
            ConversationMessage::new(
                "m1",
                "lucia",
                "¿Cenamos en Madrid el sábado?",
                Utc::now().timestamp_millis(),
            ),
        )
        .await
        .unwrap();
    store
}

fn coordinator(server: &MockServer, store: &InMemoryStore) -> GenerationCoordinator {
    let provider = Arc::new(OpenAiProvider::new("test-key", server.uri()));
    let shared = Arc::new(store.clone());
    GenerationCoordinator::new(
        PipelineConfig::default(),
        provider.clone(),
        shared.clone(),
        shared.clone(),
        shared,
    )
    .with_analyzer(Arc::new(LlmContextAnalyzer::new(provider, "gpt-4o-mini")))
}

#[tokio::test]
async fn analysis_and_generation_flow_through_http_provider() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("entityRecognition"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_openai_response(ANALYSIS_JSON)))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_openai_response(
            "```json\n[\"¡Claro que sí!\", \"¿A qué hora?\", \"Mejor el domingo.\"]\n```",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let store = seeded_store().await;
    let report = coordinator(&server, &store)
        .generate_detailed("c1", "ana", GenerateOptions::default())
        .await;

    assert!(report.outcome.success);
    let record = report.outcome.smart_replies.unwrap();
    assert_eq!(
        record.replies,
        vec!["¡Claro que sí!", "¿A qué hora?", "Mejor el domingo."]
    );
    assert_eq!(record.context_analysis.language, "es");
    assert_eq!(record.context_analysis.sentiment, Sentiment::Positive);
    assert_eq!(record.context_analysis.entities, vec!["Lucía", "Madrid"]);

    let run = report.run.unwrap();
    assert!(!run.analysis_degraded);
    assert!(!run.generation_degraded);
}

#[tokio::test]
async fn analysis_outage_falls_back_to_heuristics() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("entityRecognition"))
        .respond_with(mock_openai_error(503, "overloaded"))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_openai_response(
            r#"["Sí", "No", "Quizás"]"#,
        )))
        .mount(&server)
        .await;

    let store = seeded_store().await;
    let report = coordinator(&server, &store)
        .generate_detailed("c1", "ana", GenerateOptions::default())
        .await;

    assert!(report.outcome.success);
    let run = report.run.unwrap();
    assert!(run.analysis_degraded);
    assert_eq!(run.record.context_analysis.message_count, 1);
    assert_eq!(run.record.replies, vec!["Sí", "No", "Quizás"]);
}

#[tokio::test]
async fn provider_errors_still_produce_replies() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(mock_openai_error(500, "internal"))
        .mount(&server)
        .await;

    let store = seeded_store().await;
    let report = coordinator(&server, &store)
        .generate_detailed("c1", "ana", GenerateOptions::default())
        .await;

    assert!(report.outcome.success);
    assert_eq!(report.outcome.smart_replies.unwrap().replies, fallback_replies());
    let run = report.run.unwrap();
    assert!(run.analysis_degraded);
    assert!(run.generation_degraded);
}

//! End-to-end ask flow against mocked backend and ML servers

use kbchat::api::{BackendClient, MlStreamClient, StreamSource};
use kbchat::citations::ReferenceGroup;
use kbchat::commands::{cmd_ask, render_message, AskOptions};
use kbchat::config::Config;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUESTION: &str = "How did revenue change in @-report.pdf this year";

fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.api_url = server.uri();
    config.ml_server_url = server.uri();
    config.user_id = "u1".to_string();
    config.stream.fallback_save_ms = 50;
    config
}

fn sse_body(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|event| format!("data: {}\n\n", event))
        .collect()
}

async fn mount_backend(server: &MockServer, assistant_saves: u64) {
    Mock::given(method("GET"))
        .and(path("/api/v1/documents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "documents": [
                {"id": "d1", "name": "Report.pdf", "status": "completed"},
                {"id": "d2", "name": "Budget.pdf", "status": "completed"}
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/chats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "chat": {"id": "c9", "title": "How did revenue change"}
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/messages"))
        .and(body_partial_json(json!({"chatId": "c9", "role": "user"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/messages"))
        .and(body_partial_json(json!({"chatId": "c9", "role": "assistant"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(assistant_saves)
        .mount(server)
        .await;
}

async fn mount_stream(server: &MockServer, events: &[serde_json::Value]) {
    Mock::given(method("POST"))
        .and(path("/api/ml/streamchat"))
        .and(body_partial_json(json!({
            "userId": "u1",
            "documentId": "d1",
            "documentIds": ["d1"]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body(events)),
        )
        .expect(1)
        .mount(server)
        .await;
}

async fn ask(config: &Config) -> kbchat::commands::AskResult {
    let client = Arc::new(BackendClient::from_config(config).unwrap());
    let source: Arc<dyn StreamSource> = Arc::new(MlStreamClient::from_config(config).unwrap());
    cmd_ask(
        config,
        client,
        source,
        None,
        AskOptions {
            question: QUESTION.to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_ask_streams_persists_once_and_renders_references() {
    let server = MockServer::start().await;
    mount_backend(&server, 1).await;
    mount_stream(
        &server,
        &[
            json!({"type": "status", "message": "Searching"}),
            json!({"type": "sources", "sources": [{
                "chunk_id": "k1",
                "chunk_text": "Revenue rose 10% year on year.",
                "pdf_name": "Report.pdf",
                "page": 3,
                "score": 0.91
            }]}),
            json!({"type": "token", "content": "Revenue "}),
            json!({"type": "token", "content": "grew [1]."}),
            json!({"type": "done", "citations": [{
                "label": "1",
                "pdf_name": "Report.pdf",
                "page": 3,
                "chunk_id": "k1",
                "score": 0.91
            }, {
                "label": "2",
                "pdf_name": "Budget.pdf",
                "page": 8,
                "chunk_id": "k2",
                "score": 0.4
            }]}),
        ],
    )
    .await;

    let config = test_config(&server);
    let result = ask(&config).await;

    assert_eq!(result.outcome, "completed");
    assert_eq!(result.chat_id, "c9");
    assert_eq!(result.message.content, "Revenue grew [1].");
    assert!(!result.message.is_streaming);
    assert!(result.message.status.is_none());
    assert_eq!(
        result.references,
        vec![ReferenceGroup {
            pdf_name: "Report.pdf".to_string(),
            pages: vec![3],
            numbers: vec![1],
        }]
    );
    assert_eq!(result.sources.len(), 1);
    assert_eq!(
        result.sources[0].text.as_deref(),
        Some("Revenue rose 10% year on year.")
    );

    let rendered = render_message(&result.message);
    assert!(rendered.contains("References:\n  [1] Report.pdf, p. 3\n"));
    assert!(!rendered.contains("Budget.pdf"));
}

#[tokio::test]
async fn test_ask_without_done_is_saved_by_fallback() {
    let server = MockServer::start().await;
    mount_backend(&server, 1).await;
    mount_stream(
        &server,
        &[
            json!({"type": "token", "content": "Partial "}),
            json!({"type": "token", "content": "answer"}),
        ],
    )
    .await;

    let config = test_config(&server);
    let result = ask(&config).await;

    assert_eq!(result.outcome, "incomplete");
    assert_eq!(result.message.content, "Partial answer");
    assert!(!result.message.is_streaming);
}

#[tokio::test]
async fn test_ask_error_event_is_shown_but_not_saved() {
    let server = MockServer::start().await;
    mount_backend(&server, 0).await;
    mount_stream(
        &server,
        &[
            json!({"type": "token", "content": "Half"}),
            json!({"type": "error", "message": "model overloaded"}),
        ],
    )
    .await;

    let config = test_config(&server);
    let result = ask(&config).await;

    assert_eq!(result.outcome, "failed");
    assert_eq!(result.error.as_deref(), Some("model overloaded"));
    assert!(result.message.content.starts_with("Error: "));
    assert!(result.message.content.contains("model overloaded"));
    assert!(result.references.is_empty());
}

//! Backend REST API client
//!
//! Every endpoint answers with a `{ "success": bool, ... }` envelope.
//! Non-2xx responses and `success: false` both become [`Error::Api`], which
//! callers treat as a recoverable, user-visible failure.

mod ml;

pub use ml::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Chat, ChatMessage, Document, DocumentStatus};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};
use url::Url;

/// Persists finished messages; the stream controller only talks to this seam
#[async_trait]
pub trait MessagePersistence: Send + Sync {
    async fn save_message(&self, chat_id: &str, message: &ChatMessage) -> Result<()>;
}

/// Processing status of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatusReport {
    pub status: DocumentStatus,
    /// 0-100
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// A chat together with its stored messages
#[derive(Debug, Clone, Deserialize)]
pub struct ChatWithMessages {
    pub chat: Chat,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct DocumentsPayload {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Debug, Deserialize)]
struct DocumentPayload {
    document: Document,
}

#[derive(Debug, Deserialize)]
struct ChatsPayload {
    #[serde(default)]
    chats: Vec<Chat>,
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct Ack {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatRequest<'a> {
    user_id: &'a str,
    title: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenameChatRequest<'a> {
    user_id: &'a str,
    title: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveMessageRequest<'a> {
    chat_id: &'a str,
    user_id: &'a str,
    #[serde(flatten)]
    message: &'a ChatMessage,
}

/// Client for the backend REST API, scoped to one user
pub struct BackendClient {
    client: Client,
    base_url: Url,
    user_id: String,
}

impl BackendClient {
    pub fn new(base_url: &str, user_id: &str, config: &Config) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url,
            user_id: user_id.to_string(),
        })
    }

    /// Build a client from the loaded configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.api_url, config.require_user()?, config)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid API URL: {}", e)))
    }

    fn user_query(&self) -> [(&'static str, &str); 1] {
        [("userId", self.user_id.as_str())]
    }

    // ===== Documents =====

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let url = self.endpoint("/api/v1/documents")?;
        let response = self.client.get(url).query(&self.user_query()).send().await?;
        let payload: DocumentsPayload = read_envelope(response).await?;
        debug!("Loaded {} documents", payload.documents.len());
        Ok(payload.documents)
    }

    /// Upload a file; a 409 answer means the document already exists
    pub async fn upload_document(&self, path: &Path) -> Result<Document> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Validation(format!("Invalid file name: {}", path.display())))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(mime.essence_str())?;
        let form = reqwest::multipart::Form::new()
            .text("userId", self.user_id.clone())
            .part("file", part);

        let url = self.endpoint("/api/v1/documents/upload")?;
        let response = self.client.post(url).multipart(form).send().await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(Error::DuplicateDocument(file_name));
        }

        let payload: DocumentPayload = read_envelope(response).await?;
        Ok(payload.document)
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("/api/v1/documents/{}", document_id))?;
        let response = self
            .client
            .delete(url)
            .query(&self.user_query())
            .send()
            .await?;
        let _: Ack = read_envelope(response).await?;
        Ok(())
    }

    pub async fn document_status(&self, document_id: &str) -> Result<DocumentStatusReport> {
        let url = self.endpoint(&format!("/api/v1/documents/{}/status", document_id))?;
        let response = self.client.get(url).query(&self.user_query()).send().await?;
        read_envelope(response).await
    }

    // ===== Chats =====

    pub async fn create_chat(&self, title: &str) -> Result<Chat> {
        let url = self.endpoint("/api/v1/chats")?;
        let request = CreateChatRequest {
            user_id: &self.user_id,
            title,
        };
        let response = self.client.post(url).json(&request).send().await?;
        let payload: ChatPayload = read_envelope(response).await?;
        Ok(payload.chat)
    }

    pub async fn list_chats(&self) -> Result<Vec<Chat>> {
        let url = self.endpoint("/api/v1/chats")?;
        let response = self.client.get(url).query(&self.user_query()).send().await?;
        let payload: ChatsPayload = read_envelope(response).await?;
        Ok(payload.chats)
    }

    /// Fetch a chat and its messages, with citation labels canonicalized
    pub async fn get_chat(&self, chat_id: &str) -> Result<ChatWithMessages> {
        let url = self.endpoint(&format!("/api/v1/chats/{}", chat_id))?;
        let response = self.client.get(url).query(&self.user_query()).send().await?;
        let mut payload: ChatWithMessages = read_envelope(response).await?;
        for message in &mut payload.messages {
            message.normalize_citations();
        }
        Ok(payload)
    }

    /// Load a chat's messages, degrading to a single welcome message when
    /// the chat cannot be loaded or is empty.
    pub async fn load_messages_or_welcome(
        &self,
        chat_id: &str,
        welcome_message: &str,
    ) -> Vec<ChatMessage> {
        match self.get_chat(chat_id).await {
            Ok(loaded) if !loaded.messages.is_empty() => loaded.messages,
            Ok(_) => vec![ChatMessage::system(welcome_message)],
            Err(e) => {
                warn!("Failed to load chat {}: {}", chat_id, e);
                vec![ChatMessage::system(welcome_message)]
            }
        }
    }

    pub async fn rename_chat(&self, chat_id: &str, title: &str, max_chars: usize) -> Result<Chat> {
        let title = validate_title(title, max_chars)?;
        let url = self.endpoint(&format!("/api/v1/chats/{}", chat_id))?;
        let request = RenameChatRequest {
            user_id: &self.user_id,
            title: &title,
        };
        let response = self.client.put(url).json(&request).send().await?;
        let payload: ChatPayload = read_envelope(response).await?;
        Ok(payload.chat)
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("/api/v1/chats/{}", chat_id))?;
        let response = self
            .client
            .delete(url)
            .query(&self.user_query())
            .send()
            .await?;
        let _: Ack = read_envelope(response).await?;
        Ok(())
    }

    // ===== Messages =====

    pub async fn create_message(&self, chat_id: &str, message: &ChatMessage) -> Result<()> {
        let url = self.endpoint("/api/v1/messages")?;
        let request = SaveMessageRequest {
            chat_id,
            user_id: &self.user_id,
            message,
        };
        let response = self.client.post(url).json(&request).send().await?;
        let _: Ack = read_envelope(response).await?;
        Ok(())
    }

    pub async fn update_message(&self, chat_id: &str, message: &ChatMessage) -> Result<()> {
        let url = self.endpoint(&format!("/api/v1/messages/{}", message.id))?;
        let request = SaveMessageRequest {
            chat_id,
            user_id: &self.user_id,
            message,
        };
        let response = self.client.put(url).json(&request).send().await?;
        let _: Ack = read_envelope(response).await?;
        Ok(())
    }
}

#[async_trait]
impl MessagePersistence for BackendClient {
    async fn save_message(&self, chat_id: &str, message: &ChatMessage) -> Result<()> {
        self.create_message(chat_id, message).await
    }
}

/// Trim a chat title and check it is non-empty and short enough
pub fn validate_title(title: &str, max_chars: usize) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("Title cannot be empty".to_string()));
    }
    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(Error::Validation(format!(
            "Title is too long ({} characters, maximum {})",
            len, max_chars
        )));
    }
    Ok(trimmed.to_string())
}

/// Check status and the `success` flag, then decode the payload
async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    let success = value.get("success").and_then(Value::as_bool) == Some(true);
    if !status.is_success() || !success {
        let message = value
            .get("error")
            .or_else(|| value.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        return Err(Error::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> BackendClient {
        BackendClient::new(&server.uri(), "u1", &Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_list_documents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/documents"))
            .and(query_param("userId", "u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "documents": [
                    {"id": "d1", "name": "Report.pdf", "userId": "u1", "fileSize": 1024,
                     "createdAt": "2024-01-01T00:00:00Z", "status": "completed"}
                ]
            })))
            .mount(&server)
            .await;

        let docs = client_for(&server).await.list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "Report.pdf");
        assert_eq!(docs[0].status, DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn test_success_false_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/documents/d1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "message": "Document is locked"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .delete_document("d1")
            .await
            .unwrap_err();
        match err {
            Error::Api { status, message } => {
                assert_eq!(status, 200);
                assert_eq!(message, "Document is locked");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_2xx_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chats"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.list_chats().await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 500, .. }));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_upload_conflict_is_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/documents/upload"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(json!({"success": false, "error": "exists"})),
            )
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("Report.pdf");
        std::fs::write(&file, b"%PDF-1.4").unwrap();

        let err = client_for(&server)
            .await
            .upload_document(&file)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateDocument(name) if name == "Report.pdf"));
    }

    #[tokio::test]
    async fn test_get_chat_normalizes_citations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chats/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "chat": {"id": "c1", "title": "Budget"},
                "messages": [{
                    "id": "m1", "content": "See [2]", "role": "assistant",
                    "timestamp": "2024-01-01T00:00:00Z",
                    "citations": [{"label": "2", "pdf_name": "a.pdf", "page": 3, "chunk_id": "x", "score": 0.7}]
                }]
            })))
            .mount(&server)
            .await;

        let loaded = client_for(&server).await.get_chat("c1").await.unwrap();
        assert_eq!(loaded.chat.title, "Budget");
        let citations = loaded.messages[0].citations.as_ref().unwrap();
        assert_eq!(citations[0].label, "[2]");
    }

    #[tokio::test]
    async fn test_load_failure_falls_back_to_welcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chats/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let messages = client_for(&server)
            .await
            .load_messages_or_welcome("missing", "Welcome!")
            .await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Welcome!");
        assert_eq!(messages[0].role, crate::models::Role::System);
    }

    #[tokio::test]
    async fn test_save_message_posts_chat_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/messages"))
            .and(body_partial_json(json!({"chatId": "c1", "userId": "u1", "content": "hi"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client
            .save_message("c1", &ChatMessage::user("hi"))
            .await
            .unwrap();
    }

    #[test]
    fn test_validate_title() {
        assert_eq!(validate_title("  Q3 plan ", 20).unwrap(), "Q3 plan");
        assert!(matches!(validate_title("   ", 20), Err(Error::Validation(_))));
        assert!(matches!(
            validate_title(&"a".repeat(21), 20),
            Err(Error::Validation(_))
        ));
    }
}

//! Client for the ML streaming chat endpoint

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Body of `POST /api/ml/streamchat`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub question: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
}

impl StreamRequest {
    /// Build a request scoped to `document_ids`; a single document is also
    /// sent as `documentId`.
    pub fn new(question: &str, user_id: &str, document_ids: Vec<String>) -> Self {
        let document_id = match document_ids.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };
        Self {
            question: question.to_string(),
            user_id: user_id.to_string(),
            document_id,
            document_ids,
        }
    }
}

/// Raw response body chunks of a chat stream
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Something that can open a chat stream
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream>;
}

pub struct MlStreamClient {
    client: Client,
    base_url: Url,
}

impl MlStreamClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        // No overall timeout: answers stream for as long as the model talks
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.ml_server_url)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid ML server URL: {}", e)))
    }

    /// Start a chat stream and hand back its body chunks
    pub async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream> {
        let url = self.endpoint("/api/ml/streamchat")?;
        debug!(
            "Opening chat stream ({} scoped documents)",
            request.document_ids.len()
        );

        let response = self
            .client
            .post(url)
            .header("Accept", "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: if message.is_empty() {
                    status.canonical_reason().unwrap_or("stream failed").to_string()
                } else {
                    message
                },
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from))
            .boxed())
    }
}

#[async_trait]
impl StreamSource for MlStreamClient {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream> {
        self.open_stream(request).await
    }
}

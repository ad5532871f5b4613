//! Client-side data model shared by the API client, the stream controller
//! and the renderers.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Processing state of an uploaded document (wire contract)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploading,
    Processing,
    Chunking,
    Embedding,
    Storing,
    Completed,
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Chunking => "chunking",
            DocumentStatus::Embedding => "embedding",
            DocumentStatus::Storing => "storing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DocumentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "uploading" => Ok(DocumentStatus::Uploading),
            "processing" => Ok(DocumentStatus::Processing),
            "chunking" => Ok(DocumentStatus::Chunking),
            "embedding" => Ok(DocumentStatus::Embedding),
            "storing" => Ok(DocumentStatus::Storing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            _ => Err(Error::Validation(format!("Unknown document status: {}", s))),
        }
    }
}

/// A document in the user's knowledge base (read-only client copy)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub created_at: String,
    pub status: DocumentStatus,
}

/// A chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// How an assistant answer was produced; drives citation rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Answer grounded in retrieved chunks, carries citations
    #[default]
    Rag,
    /// General answer without document grounding
    General,
    /// Per-document summaries
    Summary,
    #[serde(other)]
    Other,
}

impl ResponseType {
    /// Whether inline markers and a reference section are rendered
    pub fn shows_citations(&self) -> bool {
        !matches!(self, ResponseType::General)
    }
}

/// A citation attached to an answer; `label` is always canonical `[N]`
/// once it has passed through [`CitationData::normalized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationData {
    #[serde(deserialize_with = "label_from_any")]
    pub label: String,
    #[serde(default)]
    pub pdf_name: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_text: Option<String>,
}

impl CitationData {
    pub fn normalized(mut self) -> Self {
        self.label = normalize_citation_label(&self.label);
        self
    }

    /// The numeric part of the label, if it has one
    pub fn number(&self) -> Option<u32> {
        citation_number(&self.label)
    }
}

/// A retrieved chunk sent alongside an answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Some servers label sources directly instead of sending citations
    #[serde(
        default,
        deserialize_with = "opt_label_from_any",
        skip_serializing_if = "Option::is_none"
    )]
    pub label: Option<String>,
}

impl SourceData {
    /// Build a citation from a labelled source
    pub fn to_citation(&self) -> Option<CitationData> {
        let label = self.label.as_deref()?;
        Some(CitationData {
            label: normalize_citation_label(label),
            pdf_name: self.pdf_name.clone().unwrap_or_default(),
            page: self.page.unwrap_or_default(),
            chunk_id: self.chunk_id.clone().unwrap_or_default(),
            score: self.score.unwrap_or_default(),
            chunk_text: self.chunk_text.clone(),
        })
    }
}

/// Summary of a single document in a summary-type answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    #[serde(alias = "pdf_name", alias = "document_name")]
    pub name: String,
    pub summary: String,
}

/// One message in a chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<CitationData>>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_summaries: Option<Vec<DocumentSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_count: Option<u32>,
}

impl ChatMessage {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content,
            role,
            timestamp: Utc::now(),
            reasoning: None,
            sources: None,
            citations: None,
            is_streaming: false,
            status: None,
            response_type: ResponseType::default(),
            document_summaries: None,
            document_count: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    /// Empty assistant message that a stream will fill in
    pub fn assistant_placeholder(status: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Assistant, String::new());
        msg.is_streaming = true;
        msg.status = Some(status.into());
        msg
    }

    /// Canonicalize every citation label; applied whenever messages are
    /// loaded from storage or finished by a stream.
    pub fn normalize_citations(&mut self) {
        if let Some(citations) = self.citations.take() {
            self.citations = Some(
                citations
                    .into_iter()
                    .map(CitationData::normalized)
                    .collect(),
            );
        }
    }
}

/// Normalize a citation label to the canonical `[N]` form.
///
/// `"1"`, `"[1]"` and `" [ 1 ] "` all become `"[1]"`. Labels without an
/// integer inside are returned unchanged.
pub fn normalize_citation_label(label: &str) -> String {
    match citation_number(label) {
        Some(n) => format!("[{}]", n),
        None => label.to_string(),
    }
}

/// Extract the integer from a `[N]` or bare `N` label
pub fn citation_number(label: &str) -> Option<u32> {
    let trimmed = label.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    inner.trim().parse::<u32>().ok()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Text(String),
    Number(u64),
}

impl From<RawLabel> for String {
    fn from(raw: RawLabel) -> Self {
        match raw {
            RawLabel::Text(s) => s,
            RawLabel::Number(n) => n.to_string(),
        }
    }
}

fn label_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawLabel::deserialize(deserializer).map(String::from)
}

fn opt_label_from_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawLabel>::deserialize(deserializer).map(|raw| raw.map(String::from))
}

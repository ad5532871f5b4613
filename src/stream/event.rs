//! Chat stream wire format
//!
//! The ML server answers with newline-delimited `data: {json}` lines. Each
//! JSON payload carries a `type` discriminator.

use crate::models::{CitationData, DocumentSummary, ResponseType, SourceData};
use serde::Deserialize;

/// One decoded stream event
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Retrieved chunks for the answer
    Sources {
        #[serde(default)]
        sources: Vec<SourceData>,
    },
    /// A fragment of answer text
    Token {
        #[serde(default)]
        content: String,
    },
    /// Progress notice from the server
    Status {
        #[serde(default)]
        message: Option<String>,
    },
    /// Terminal event with the final answer metadata
    Done(DonePayload),
    /// Terminal failure
    Error {
        #[serde(default, alias = "error")]
        message: Option<String>,
    },
    /// Any event type this client does not know
    #[serde(other)]
    Unknown,
}

/// Payload of the `done` event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DonePayload {
    #[serde(default, alias = "fullResponse")]
    pub full_response: Option<String>,
    #[serde(default)]
    pub citations: Option<Vec<CitationData>>,
    #[serde(default)]
    pub sources: Option<Vec<SourceData>>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default, alias = "responseType")]
    pub response_type: Option<ResponseType>,
    #[serde(default, alias = "documentSummaries")]
    pub document_summaries: Option<Vec<DocumentSummary>>,
    #[serde(default, alias = "documentCount")]
    pub document_count: Option<u32>,
}

/// Classification of a single stream line
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Event(StreamEvent),
    /// Blank lines, comments, non-data fields and `[DONE]` sentinels
    Skip,
    /// A data line whose JSON could not be decoded
    Malformed { data: String, error: String },
}

/// Parse one line of the stream
pub fn parse_sse_line(line: &str) -> ParsedLine {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        return ParsedLine::Skip;
    };
    let data = data.strip_prefix(' ').unwrap_or(data).trim();
    if data.is_empty() || data == "[DONE]" {
        return ParsedLine::Skip;
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => ParsedLine::Event(event),
        Err(e) => ParsedLine::Malformed {
            data: data.to_string(),
            error: e.to_string(),
        },
    }
}

/// Splits a chunked byte stream into complete lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters
/// and lines split across chunks are reassembled intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

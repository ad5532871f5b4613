//! Streaming answers from the ML server
//!
//! [`StreamController`] consumes the `data: {json}` event stream for one
//! assistant message at a time, merges every event into the shared
//! [`MessageStore`] by message id, and persists the finished answer exactly
//! once.

pub mod controller;
pub mod event;
pub mod store;

pub use controller::{StreamController, StreamOutcome};
pub use event::{parse_sse_line, DonePayload, ParsedLine, SseDecoder, StreamEvent};
pub use store::MessageStore;

use crate::models::Document;
use crate::tags::tagged_document_ids;

/// Status shown on the placeholder before the server reports progress
pub const PLACEHOLDER_STATUS: &str = "Thinking...";

/// Which documents a question is asked against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentScope {
    /// Ids sent to the ML server; empty means all documents
    pub document_ids: Vec<String>,
    /// Documents the user picked explicitly, if a picker was used
    pub selected_count: Option<usize>,
    /// Verified `@-` tags found in the question
    pub tagged_count: usize,
}

impl DocumentScope {
    /// Scope over every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Combine explicitly selected ids with the documents tagged in
    /// `question`. Selected ids come first; duplicates are dropped.
    pub fn resolve(question: &str, selected_ids: &[String], documents: &[Document]) -> Self {
        let tagged = tagged_document_ids(question, documents);
        let tagged_count = tagged.len();

        let mut document_ids: Vec<String> = Vec::with_capacity(selected_ids.len() + tagged_count);
        for id in selected_ids {
            if !document_ids.contains(id) {
                document_ids.push(id.clone());
            }
        }
        let selected_count = document_ids.len();
        for id in tagged {
            if !document_ids.contains(&id) {
                document_ids.push(id);
            }
        }

        Self {
            document_ids,
            selected_count: (selected_count > 0).then_some(selected_count),
            tagged_count,
        }
    }

    /// Number of documents the status line talks about: the explicit
    /// selection if there is one, else the tag count. Zero means all.
    pub fn effective_count(&self) -> usize {
        match self.selected_count {
            Some(n) if n > 0 => n,
            _ => self.tagged_count,
        }
    }

    pub fn status_message(&self) -> String {
        let target = match self.effective_count() {
            0 => "all documents".to_string(),
            1 => "single document".to_string(),
            n => format!("{} documents", n),
        };
        format!("Searching and analysing {}...", target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;

    fn doc(id: &str, name: &str) -> Document {
        Document {
            id: id.to_string(),
            name: name.to_string(),
            user_id: "u1".to_string(),
            file_size: 1,
            created_at: String::new(),
            status: DocumentStatus::Completed,
        }
    }

    #[test]
    fn test_status_message_by_scope() {
        assert_eq!(
            DocumentScope::all().status_message(),
            "Searching and analysing all documents..."
        );

        let docs = vec![doc("d1", "Report.pdf"), doc("d2", "Budget.pdf")];
        let tagged = DocumentScope::resolve("compare @-Report.pdf", &[], &docs);
        assert_eq!(tagged.document_ids, vec!["d1".to_string()]);
        assert_eq!(
            tagged.status_message(),
            "Searching and analysing single document..."
        );

        let both = DocumentScope::resolve("@-Report.pdf vs @-Budget.pdf", &[], &docs);
        assert_eq!(both.status_message(), "Searching and analysing 2 documents...");
    }

    #[test]
    fn test_explicit_selection_wins_over_tags() {
        let docs = vec![doc("d1", "Report.pdf"), doc("d2", "Budget.pdf")];
        let selected = vec!["d2".to_string(), "d3".to_string(), "d4".to_string()];
        let scope = DocumentScope::resolve("see @-Report.pdf and @-Budget.pdf", &selected, &docs);

        assert_eq!(scope.effective_count(), 3);
        assert_eq!(
            scope.document_ids,
            vec!["d2".to_string(), "d3".to_string(), "d4".to_string(), "d1".to_string()]
        );
    }

    #[test]
    fn test_repeated_selection_counts_once() {
        let selected = vec!["d1".to_string(), "d1".to_string()];
        let scope = DocumentScope::resolve("q", &selected, &[]);

        assert_eq!(scope.document_ids, vec!["d1".to_string()]);
        assert_eq!(scope.selected_count, Some(1));
        assert_eq!(
            scope.status_message(),
            "Searching and analysing single document..."
        );
    }
}

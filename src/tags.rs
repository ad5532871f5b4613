//! Document tag (`@-name`) parsing and chip rendering
//!
//! Offsets are character offsets into the raw input buffer. Rendering never
//! changes that buffer: the chip segments concatenate back to the exact
//! input text, so cursor math and submission keep working on raw text.

use crate::models::Document;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Marker that starts a document tag
pub const TAG_PREFIX: &str = "@-";

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w.\-]+").expect("valid tag token regex"))
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// Byte offset of the `char_idx`-th character (clamped to the end)
pub(crate) fn char_to_byte(text: &str, char_idx: usize) -> usize {
    text.char_indices()
        .nth(char_idx)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}

/// Character index of a byte offset that lies on a char boundary
pub(crate) fn byte_to_char(text: &str, byte_idx: usize) -> usize {
    text[..byte_idx].chars().count()
}

/// A verified document tag inside a text buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTag {
    /// Character offset of the `@`
    pub start: usize,
    /// Character offset one past the tag
    pub end: usize,
    /// Raw tag text including the `@-` prefix
    pub text: String,
    pub document_id: String,
    pub document_name: String,
}

impl DocumentTag {
    /// Backspace at `cursor` hits this tag when the cursor is inside it or
    /// immediately after it
    pub fn contains_cursor(&self, cursor: usize) -> bool {
        cursor > self.start && cursor <= self.end
    }
}

/// Find the verified `@-` tags in `text`.
///
/// A tag is kept only when it names a known document: either the full name
/// follows the prefix (case-insensitive, longest name wins), or the token
/// after the prefix equals or is contained in some document name.
/// Unverified `@-` text stays plain text.
pub fn parse_document_tags(text: &str, documents: &[Document]) -> Vec<DocumentTag> {
    let mut names: Vec<(&Document, String, usize)> = documents
        .iter()
        .filter(|d| !d.name.is_empty())
        .map(|d| (d, d.name.to_lowercase(), d.name.chars().count()))
        .collect();
    // Longest names first so "Report 2024.pdf" beats "Report"
    names.sort_by(|a, b| b.2.cmp(&a.2));

    let mut tags = Vec::new();
    let mut consumed_to = 0usize;

    for (byte_pos, _) in text.match_indices(TAG_PREFIX) {
        if byte_pos < consumed_to {
            continue;
        }
        let body_start = byte_pos + TAG_PREFIX.len();
        let rest = &text[body_start..];

        let matched = match_full_name(rest, &names).or_else(|| match_token(rest, &names));
        let Some((doc, body_len)) = matched else {
            continue;
        };

        let end_byte = body_start + body_len;
        let start = byte_to_char(text, byte_pos);
        tags.push(DocumentTag {
            start,
            end: byte_to_char(text, end_byte),
            text: text[byte_pos..end_byte].to_string(),
            document_id: doc.id.clone(),
            document_name: doc.name.clone(),
        });
        consumed_to = end_byte;
    }

    tags
}

fn match_full_name<'d>(rest: &str, names: &[(&'d Document, String, usize)]) -> Option<(&'d Document, usize)> {
    for (doc, lower, char_len) in names {
        let candidate_end = char_to_byte(rest, *char_len);
        if rest[..candidate_end].chars().count() != *char_len {
            continue;
        }
        if rest[..candidate_end].to_lowercase() != *lower {
            continue;
        }
        // Sentence punctuation may follow a tag
        let boundary = rest[candidate_end..]
            .trim_start_matches('.')
            .chars()
            .next()
            .map_or(true, |c| !is_token_char(c));
        if boundary {
            return Some((doc, candidate_end));
        }
    }
    None
}

fn match_token<'d>(rest: &str, names: &[(&'d Document, String, usize)]) -> Option<(&'d Document, usize)> {
    let token = token_re().find(rest)?.as_str().trim_end_matches('.');
    if token.is_empty() {
        return None;
    }
    let lower = token.to_lowercase();

    let exact = names.iter().find(|(_, name, _)| *name == lower);
    let contained = || names.iter().find(|(_, name, _)| name.contains(&lower));
    exact
        .or_else(contained)
        .map(|(doc, _, _)| (*doc, token.len()))
}

/// Unique ids of the documents tagged in `text`, in order of appearance
pub fn tagged_document_ids(text: &str, documents: &[Document]) -> Vec<String> {
    let mut seen = HashSet::new();
    parse_document_tags(text, documents)
        .into_iter()
        .filter(|tag| seen.insert(tag.document_id.clone()))
        .map(|tag| tag.document_id)
        .collect()
}

/// A piece of rendered input: plain text or a document chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSegment {
    Text(String),
    Chip { raw: String, document_name: String },
}

impl TagSegment {
    /// The raw buffer text this segment sits on top of
    pub fn raw(&self) -> &str {
        match self {
            TagSegment::Text(text) => text,
            TagSegment::Chip { raw, .. } => raw,
        }
    }
}

/// Split `text` into plain and chip segments using already-parsed tags
pub fn render_tag_segments(text: &str, tags: &[DocumentTag]) -> Vec<TagSegment> {
    let mut segments = Vec::new();
    let mut cursor = 0usize;

    for tag in tags {
        let start = char_to_byte(text, tag.start);
        let end = char_to_byte(text, tag.end);
        if start < cursor || end > text.len() {
            continue;
        }
        if start > cursor {
            segments.push(TagSegment::Text(text[cursor..start].to_string()));
        }
        segments.push(TagSegment::Chip {
            raw: text[start..end].to_string(),
            document_name: tag.document_name.clone(),
        });
        cursor = end;
    }

    if cursor < text.len() {
        segments.push(TagSegment::Text(text[cursor..].to_string()));
    }
    segments
}

/// Result of an edit on the raw buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEdit {
    pub text: String,
    pub cursor: usize,
}

/// Backspace over a tag removes the whole tag in one edit and leaves the
/// cursor at the tag's start. Returns `None` when the cursor is not inside
/// or right after a tag, so ordinary single-character deletion applies.
pub fn backspace_tag(text: &str, cursor: usize, tags: &[DocumentTag]) -> Option<TagEdit> {
    let tag = tags.iter().find(|tag| tag.contains_cursor(cursor))?;
    let start = char_to_byte(text, tag.start);
    let end = char_to_byte(text, tag.end);

    let mut edited = String::with_capacity(text.len() - (end - start));
    edited.push_str(&text[..start]);
    edited.push_str(&text[end..]);

    Some(TagEdit {
        text: edited,
        cursor: tag.start,
    })
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
            file_size: 10,
            created_at: String::new(),
            status: DocumentStatus::Completed,
        }
    }

    #[test]
    fn test_parse_verified_tags_only() {
        let docs = vec![doc("d1", "Report.pdf"), doc("d2", "Budget 2024.pdf")];
        let text = "compare @-Report.pdf with @-Unknown.pdf and @-budget";

        let tags = parse_document_tags(text, &docs);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].text, "@-Report.pdf");
        assert_eq!(tags[0].start, 8);
        assert_eq!(tags[0].end, 20);
        assert_eq!(tags[0].document_id, "d1");
        assert_eq!(tags[1].text, "@-budget");
        assert_eq!(tags[1].document_id, "d2");
    }

    #[test]
    fn test_full_name_with_spaces() {
        let docs = vec![doc("d2", "Budget 2024.pdf")];
        let tags = parse_document_tags("see @-budget 2024.pdf now", &docs);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].text, "@-budget 2024.pdf");
        assert_eq!(tags[0].document_name, "Budget 2024.pdf");
    }

    #[test]
    fn test_tag_before_sentence_period() {
        let docs = vec![doc("d1", "Report.pdf"), doc("d2", "Budget 2024.pdf")];
        let tags = parse_document_tags("Summarize @-Report.pdf. Then @-budget.", &docs);

        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].text, "@-Report.pdf");
        assert_eq!(tags[0].document_id, "d1");
        assert_eq!(tags[1].text, "@-budget");
        assert_eq!(tags[1].document_id, "d2");

        assert!(parse_document_tags("see @-Report.pdf.bak", &docs[..1]).is_empty());
    }

    #[test]
    fn test_tagged_document_ids_are_unique() {
        let docs = vec![doc("d1", "Report.pdf")];
        let ids = tagged_document_ids("@-Report.pdf and again @-report.pdf", &docs);
        assert_eq!(ids, vec!["d1".to_string()]);
    }

    #[test]
    fn test_segments_preserve_raw_text() {
        let docs = vec![doc("d1", "Report.pdf")];
        let text = "é @-Report.pdf tail";
        let tags = parse_document_tags(text, &docs);
        let segments = render_tag_segments(text, &tags);

        assert_eq!(segments.len(), 3);
        assert!(matches!(&segments[1], TagSegment::Chip { document_name, .. } if document_name == "Report.pdf"));
        let rebuilt: String = segments.iter().map(TagSegment::raw).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_backspace_removes_whole_tag() {
        let docs = vec![doc("d1", "Report.pdf")];
        let text = "see @-Report.pdf please";
        let tags = parse_document_tags(text, &docs);
        let (start, end) = (tags[0].start, tags[0].end);

        for cursor in (start + 1)..=end {
            let edit = backspace_tag(text, cursor, &tags).unwrap();
            assert_eq!(edit.text, "see  please");
            assert_eq!(edit.cursor, start);
        }
    }

    #[test]
    fn test_backspace_outside_tag_is_untouched() {
        let docs = vec![doc("d1", "Report.pdf")];
        let text = "see @-Report.pdf please";
        let tags = parse_document_tags(text, &docs);

        assert!(backspace_tag(text, tags[0].start, &tags).is_none());
        assert!(backspace_tag(text, tags[0].end + 2, &tags).is_none());
    }
}

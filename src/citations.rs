//! Citation resolution for finished answers
//!
//! Inline `[n]` / `[n, m]` markers in the answer become badges, and the
//! citations actually referenced in the text are grouped per document into
//! a reference list.

use crate::models::{ChatMessage, CitationData, ResponseType, SourceData};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

/// Markers rendered as badges per `[...]` group
pub const MAX_INLINE_BADGES: usize = 2;

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]").expect("valid citation marker regex"))
}

fn marker_numbers(group: &str) -> Vec<u32> {
    group
        .split(',')
        .filter_map(|n| n.trim().parse::<u32>().ok())
        .collect()
}

/// A piece of a rendered answer
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerSegment {
    Text(String),
    /// A resolvable citation marker
    Badge {
        number: u32,
        pdf_name: String,
        page: u32,
    },
}

/// All used citations of one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceGroup {
    pub pdf_name: String,
    /// Ascending, without duplicates
    pub pages: Vec<u32>,
    pub numbers: Vec<u32>,
}

/// Details shown when a badge is opened
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitationPopover {
    pub number: u32,
    pub pdf_name: String,
    pub page: u32,
    pub score: f32,
    pub text: Option<String>,
}

pub struct CitationResolver {
    answer: String,
    response_type: ResponseType,
    by_number: BTreeMap<u32, CitationData>,
    sources_by_chunk: HashMap<String, SourceData>,
    synthesized_by_chunk: HashMap<String, SourceData>,
    referenced: BTreeSet<u32>,
}

impl CitationResolver {
    pub fn new(
        answer: &str,
        citations: &[CitationData],
        sources: &[SourceData],
        response_type: ResponseType,
    ) -> Self {
        let mut by_number = BTreeMap::new();
        let mut synthesized_by_chunk = HashMap::new();
        for citation in citations {
            let citation = citation.clone().normalized();
            let Some(number) = citation.number() else {
                continue;
            };
            if let Some(text) = citation.chunk_text.as_ref().filter(|t| !t.is_empty()) {
                synthesized_by_chunk
                    .entry(citation.chunk_id.clone())
                    .or_insert_with(|| SourceData {
                        chunk_id: Some(citation.chunk_id.clone()),
                        chunk_text: Some(text.clone()),
                        pdf_name: Some(citation.pdf_name.clone()),
                        page: Some(citation.page),
                        score: Some(citation.score),
                        label: Some(citation.label.clone()),
                    });
            }
            // First citation wins when a number repeats
            by_number.entry(number).or_insert(citation);
        }

        let sources_by_chunk = sources
            .iter()
            .filter_map(|s| s.chunk_id.clone().map(|id| (id, s.clone())))
            .collect();

        let referenced = marker_re()
            .captures_iter(answer)
            .flat_map(|caps| marker_numbers(&caps[1]))
            .collect();

        Self {
            answer: answer.to_string(),
            response_type,
            by_number,
            sources_by_chunk,
            synthesized_by_chunk,
            referenced,
        }
    }

    pub fn from_message(message: &ChatMessage) -> Self {
        Self::new(
            &message.content,
            message.citations.as_deref().unwrap_or_default(),
            message.sources.as_deref().unwrap_or_default(),
            message.response_type,
        )
    }

    /// Numbers that appear in markers of the answer text
    pub fn referenced_numbers(&self) -> &BTreeSet<u32> {
        &self.referenced
    }

    pub fn citation(&self, number: u32) -> Option<&CitationData> {
        self.by_number.get(&number)
    }

    /// The source behind a citation: the sources array first, then the
    /// text embedded in the citation itself
    pub fn source_for(&self, citation: &CitationData) -> Option<&SourceData> {
        self.sources_by_chunk
            .get(&citation.chunk_id)
            .or_else(|| self.synthesized_by_chunk.get(&citation.chunk_id))
    }

    /// Citations referenced in the text that resolve, ordered by number
    pub fn used_citations(&self) -> Vec<&CitationData> {
        if !self.response_type.shows_citations() {
            return Vec::new();
        }
        self.referenced
            .iter()
            .filter_map(|n| self.by_number.get(n))
            .collect()
    }

    /// Answer text with markers replaced by badges.
    ///
    /// Only the first [`MAX_INLINE_BADGES`] numbers of a group are shown.
    /// A number without a citation stays as plain `[n]` text.
    pub fn segments(&self) -> Vec<AnswerSegment> {
        if !self.response_type.shows_citations() {
            return vec![AnswerSegment::Text(self.answer.clone())];
        }

        let mut segments = Vec::new();
        let mut last = 0usize;
        for caps in marker_re().captures_iter(&self.answer) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            push_text(&mut segments, &self.answer[last..whole.start()]);
            last = whole.end();

            let numbers = marker_numbers(&caps[1]);
            if numbers.is_empty() {
                push_text(&mut segments, whole.as_str());
                continue;
            }
            for number in numbers.into_iter().take(MAX_INLINE_BADGES) {
                match self.by_number.get(&number) {
                    Some(citation) => segments.push(AnswerSegment::Badge {
                        number,
                        pdf_name: citation.pdf_name.clone(),
                        page: citation.page,
                    }),
                    None => push_text(&mut segments, &format!("[{}]", number)),
                }
            }
        }
        push_text(&mut segments, &self.answer[last..]);
        segments
    }

    /// Used citations grouped by document, in order of first use
    pub fn references(&self) -> Vec<ReferenceGroup> {
        let mut groups: Vec<ReferenceGroup> = Vec::new();
        for citation in self.used_citations() {
            let Some(number) = citation.number() else {
                continue;
            };
            match groups.iter_mut().find(|g| g.pdf_name == citation.pdf_name) {
                Some(group) => {
                    group.pages.push(citation.page);
                    group.numbers.push(number);
                }
                None => groups.push(ReferenceGroup {
                    pdf_name: citation.pdf_name.clone(),
                    pages: vec![citation.page],
                    numbers: vec![number],
                }),
            }
        }

        for group in &mut groups {
            group.pages.sort_unstable();
            group.pages.dedup();
        }
        groups
    }

    /// Popover details for badge `number`, if it resolves
    pub fn popover(&self, number: u32) -> Option<CitationPopover> {
        let citation = self.by_number.get(&number)?;
        let text = citation
            .chunk_text
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| self.source_for(citation).and_then(|s| s.chunk_text.clone()));

        Some(CitationPopover {
            number,
            pdf_name: citation.pdf_name.clone(),
            page: citation.page,
            score: citation.score,
            text,
        })
    }

    /// Whether a citation has text to show, from either channel
    pub fn is_displayable(&self, number: u32) -> bool {
        self.popover(number).is_some_and(|p| p.text.is_some())
    }
}

fn push_text(segments: &mut Vec<AnswerSegment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(AnswerSegment::Text(prev)) = segments.last_mut() {
        prev.push_str(text);
    } else {
        segments.push(AnswerSegment::Text(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(label: &str, pdf: &str, page: u32, chunk: &str) -> CitationData {
        CitationData {
            label: label.to_string(),
            pdf_name: pdf.to_string(),
            page,
            chunk_id: chunk.to_string(),
            score: 0.5,
            chunk_text: None,
        }
    }

    #[test]
    fn test_references_include_only_used_citations() {
        let citations = vec![
            citation("1", "a.pdf", 5, "c1"),
            citation("[2]", "b.pdf", 2, "c2"),
            citation(" [ 3 ] ", "a.pdf", 3, "c3"),
        ];
        let resolver = CitationResolver::new("A [1] B [3]", &citations, &[], ResponseType::Rag);

        let refs = resolver.references();
        assert_eq!(
            refs,
            vec![ReferenceGroup {
                pdf_name: "a.pdf".to_string(),
                pages: vec![3, 5],
                numbers: vec![1, 3],
            }]
        );
    }

    #[test]
    fn test_pages_merged_and_deduplicated() {
        let citations = vec![
            citation("1", "a.pdf", 4, "c1"),
            citation("2", "b.pdf", 9, "c2"),
            citation("3", "a.pdf", 4, "c3"),
            citation("4", "a.pdf", 1, "c4"),
        ];
        let resolver =
            CitationResolver::new("x [1, 2] y [3,4]", &citations, &[], ResponseType::Rag);

        let refs = resolver.references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].pdf_name, "a.pdf");
        assert_eq!(refs[0].pages, vec![1, 4]);
        assert_eq!(refs[1].pdf_name, "b.pdf");
    }

    #[test]
    fn test_segments_badges_and_unresolved_markers() {
        let citations = vec![citation("1", "a.pdf", 2, "c1"), citation("2", "b.pdf", 7, "c2")];
        let resolver =
            CitationResolver::new("See [1] and [9]. Also [2, 1, 3].", &citations, &[], ResponseType::Rag);

        assert_eq!(
            resolver.segments(),
            vec![
                AnswerSegment::Text("See ".to_string()),
                AnswerSegment::Badge {
                    number: 1,
                    pdf_name: "a.pdf".to_string(),
                    page: 2
                },
                AnswerSegment::Text(" and [9]. Also ".to_string()),
                AnswerSegment::Badge {
                    number: 2,
                    pdf_name: "b.pdf".to_string(),
                    page: 7
                },
                AnswerSegment::Badge {
                    number: 1,
                    pdf_name: "a.pdf".to_string(),
                    page: 2
                },
                AnswerSegment::Text(".".to_string()),
            ]
        );
        // Numbers past the inline limit still count as referenced
        assert!(resolver.referenced_numbers().contains(&3));
    }

    #[test]
    fn test_oversized_marker_stays_as_text() {
        let citations = vec![citation("1", "a.pdf", 2, "c1")];
        let resolver =
            CitationResolver::new("See [99999999999] and [1] end", &citations, &[], ResponseType::Rag);

        assert_eq!(
            resolver.segments(),
            vec![
                AnswerSegment::Text("See [99999999999] and ".to_string()),
                AnswerSegment::Badge {
                    number: 1,
                    pdf_name: "a.pdf".to_string(),
                    page: 2
                },
                AnswerSegment::Text(" end".to_string()),
            ]
        );
        assert_eq!(resolver.referenced_numbers().len(), 1);
    }

    #[test]
    fn test_general_answers_render_plain() {
        let citations = vec![citation("1", "a.pdf", 2, "c1")];
        let resolver = CitationResolver::new("Plain [1]", &citations, &[], ResponseType::General);

        assert_eq!(
            resolver.segments(),
            vec![AnswerSegment::Text("Plain [1]".to_string())]
        );
        assert!(resolver.references().is_empty());
    }

    #[test]
    fn test_popover_text_falls_back_across_channels() {
        let mut embedded = citation("1", "a.pdf", 2, "c1");
        embedded.chunk_text = Some("embedded text".to_string());
        let citations = vec![embedded, citation("2", "b.pdf", 3, "c2"), citation("3", "c.pdf", 1, "c3")];
        let sources = vec![SourceData {
            chunk_id: Some("c2".to_string()),
            chunk_text: Some("source text".to_string()),
            ..Default::default()
        }];
        let resolver = CitationResolver::new("[1][2][3]", &citations, &sources, ResponseType::Rag);

        assert_eq!(resolver.popover(1).unwrap().text.as_deref(), Some("embedded text"));
        assert_eq!(resolver.popover(2).unwrap().text.as_deref(), Some("source text"));
        assert!(resolver.popover(3).unwrap().text.is_none());
        assert!(resolver.popover(4).is_none());

        // Citation-embedded text makes a pair displayable without a source entry
        let first = resolver.citation(1).unwrap();
        assert_eq!(
            resolver.source_for(first).and_then(|s| s.chunk_text.as_deref()),
            Some("embedded text")
        );
        assert!(resolver.is_displayable(1));
        assert!(!resolver.is_displayable(3));
    }
}

//! Composer helpers: `@` mention suggestions and tag inspection

use super::docs::load_documents;
use crate::api::BackendClient;
use crate::autocomplete::{AutocompleteEngine, Key, KeyOutcome};
use crate::cache::LocalCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::Document;
use crate::tags::{parse_document_tags, render_tag_segments, TagSegment};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MentionOptions {
    pub text: String,
    /// Character offset; defaults to the end of the text
    pub cursor: Option<usize>,
    /// ArrowDown presses before reading the selection
    pub down: usize,
    /// Press Enter to commit the selected suggestion
    pub commit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MentionTrigger {
    pub start: usize,
    pub end: usize,
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MentionResult {
    pub is_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<MentionTrigger>,
    pub candidates: Vec<Document>,
    pub selected_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_cursor: Option<usize>,
}

/// Run the autocomplete engine over a text buffer
pub async fn cmd_mention(
    config: &Config,
    client: &BackendClient,
    cache: Option<Arc<LocalCache>>,
    options: MentionOptions,
) -> Result<MentionResult> {
    let documents = load_documents(config, client, cache.as_deref(), false).await?;
    let mut engine = AutocompleteEngine::new(config, client.user_id(), cache);
    engine.set_documents(documents).await;

    let text_len = options.text.chars().count();
    let cursor = options.cursor.unwrap_or(text_len);
    if cursor > text_len {
        return Err(Error::Validation(format!(
            "cursor {} is past the end of the text ({} characters)",
            cursor, text_len
        )));
    }

    engine.update(&options.text, cursor).await;
    for _ in 0..options.down {
        engine.handle_key_down(Key::ArrowDown);
    }

    let state = engine.state().clone();
    let completion = if options.commit {
        match engine.handle_key_down(Key::Enter) {
            KeyOutcome::Committed(completion) => Some(completion),
            _ => None,
        }
    } else {
        None
    };

    Ok(MentionResult {
        is_open: state.is_open,
        trigger: state.trigger_position.map(|t| MentionTrigger {
            start: t.start,
            end: t.end,
            query: t.query,
        }),
        candidates: state.filtered_documents,
        selected_index: state.selected_index,
        completed_text: completion.as_ref().map(|c| c.text.clone()),
        completed_cursor: completion.map(|c| c.cursor),
    })
}

pub fn print_mention(result: &MentionResult) {
    if let Some(text) = &result.completed_text {
        println!("{}", text);
        return;
    }

    match (&result.trigger, result.is_open) {
        (Some(trigger), true) => {
            println!(
                "Suggestions for '@{}' (chars {}..{}):",
                trigger.query, trigger.start, trigger.end
            );
            for (i, doc) in result.candidates.iter().enumerate() {
                let marker = if i == result.selected_index { ">" } else { " " };
                println!("{} {} [{}]", marker, doc.name, doc.status);
            }
        }
        (Some(trigger), false) => println!("No documents match '@{}'", trigger.query),
        (None, _) => println!("No mention at the cursor"),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TagView {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub document_id: String,
    pub document_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagsResult {
    pub tags: Vec<TagView>,
    /// Text with every verified tag shown as a chip
    pub rendered: String,
}

/// List the verified document tags in `text`
pub async fn cmd_tags(
    config: &Config,
    client: &BackendClient,
    cache: Option<&LocalCache>,
    text: &str,
) -> Result<TagsResult> {
    let documents = load_documents(config, client, cache, false).await?;
    let tags = parse_document_tags(text, &documents);

    let rendered = render_tag_segments(text, &tags)
        .into_iter()
        .map(|segment| match segment {
            TagSegment::Text(text) => text,
            TagSegment::Chip { document_name, .. } => format!("⟦{}⟧", document_name),
        })
        .collect();

    Ok(TagsResult {
        tags: tags
            .into_iter()
            .map(|tag| TagView {
                start: tag.start,
                end: tag.end,
                text: tag.text,
                document_id: tag.document_id,
                document_name: tag.document_name,
            })
            .collect(),
        rendered,
    })
}

pub fn print_tags(result: &TagsResult) {
    if result.tags.is_empty() {
        println!("No document tags found");
        return;
    }
    println!("{}\n", result.rendered);
    for tag in &result.tags {
        println!(
            "• {} -> {} ({}) at {}..{}",
            tag.text, tag.document_name, tag.document_id, tag.start, tag.end
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_with_documents() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/documents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "documents": [
                    {"id": "d1", "name": "Report.pdf", "status": "completed"},
                    {"id": "d2", "name": "Budget 2024.pdf", "status": "completed"}
                ]
            })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_mention_commits_selection() {
        let server = server_with_documents().await;
        let config = Config::default();
        let client = BackendClient::new(&server.uri(), "u1", &config).unwrap();

        let result = cmd_mention(
            &config,
            &client,
            None,
            MentionOptions {
                text: "compare @bud".to_string(),
                cursor: None,
                down: 0,
                commit: true,
            },
        )
        .await
        .unwrap();

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.completed_text.as_deref(), Some("compare @-Budget 2024.pdf "));
        assert_eq!(result.completed_cursor, Some(26));
    }

    #[tokio::test]
    async fn test_mention_rejects_cursor_past_end() {
        let server = server_with_documents().await;
        let config = Config::default();
        let client = BackendClient::new(&server.uri(), "u1", &config).unwrap();

        let result = cmd_mention(
            &config,
            &client,
            None,
            MentionOptions {
                text: "@r".to_string(),
                cursor: Some(5),
                down: 0,
                commit: false,
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_tags_render_chips() {
        let server = server_with_documents().await;
        let config = Config::default();
        let client = BackendClient::new(&server.uri(), "u1", &config).unwrap();

        let result = cmd_tags(&config, &client, None, "see @-report.pdf and @-nothing")
            .await
            .unwrap();
        assert_eq!(result.tags.len(), 1);
        assert_eq!(result.tags[0].document_id, "d1");
        assert_eq!(result.rendered, "see ⟦Report.pdf⟧ and @-nothing");
    }
}

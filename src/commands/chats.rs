//! Chat commands: list, new, show, rename, delete

use crate::api::{validate_title, BackendClient};
use crate::citations::{AnswerSegment, CitationResolver};
use crate::config::Config;
use crate::error::Result;
use crate::models::{Chat, ChatMessage, ResponseType, Role};
use serde::Serialize;

pub async fn cmd_list_chats(client: &BackendClient) -> Result<Vec<Chat>> {
    client.list_chats().await
}

pub async fn cmd_new_chat(config: &Config, client: &BackendClient, title: &str) -> Result<Chat> {
    let title = validate_title(title, config.chat.max_title_chars)?;
    client.create_chat(&title).await
}

/// A chat's messages, or the welcome message when they cannot be loaded
#[derive(Debug, Clone, Serialize)]
pub struct ChatTranscript {
    pub chat_id: String,
    pub messages: Vec<ChatMessage>,
}

pub async fn cmd_show_chat(
    config: &Config,
    client: &BackendClient,
    chat_id: &str,
) -> Result<ChatTranscript> {
    let mut messages = client
        .load_messages_or_welcome(chat_id, &config.chat.welcome_message)
        .await;
    for message in &mut messages {
        message.normalize_citations();
    }
    Ok(ChatTranscript {
        chat_id: chat_id.to_string(),
        messages,
    })
}

pub async fn cmd_rename_chat(
    config: &Config,
    client: &BackendClient,
    chat_id: &str,
    title: &str,
) -> Result<Chat> {
    client
        .rename_chat(chat_id, title, config.chat.max_title_chars)
        .await
}

pub async fn cmd_delete_chat(client: &BackendClient, chat_id: &str) -> Result<()> {
    client.delete_chat(chat_id).await
}

pub fn print_chats(chats: &[Chat]) {
    println!("\n💬 Chats\n");

    if chats.is_empty() {
        println!("No chats yet. Use 'kbchat chats new <title>' or 'kbchat ask' to start one.");
        return;
    }

    for chat in chats {
        println!("• {}", chat.title);
        println!("  ID: {}", chat.id);
        if !chat.updated_at.is_empty() {
            println!("  Updated: {}", chat.updated_at);
        }
    }
}

pub fn print_transcript(transcript: &ChatTranscript) {
    for message in &transcript.messages {
        let speaker = match message.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
            Role::System => "kbchat",
        };
        println!("\n{} ({}):", speaker, message.timestamp.format("%Y-%m-%d %H:%M"));
        print!("{}", render_message(message));
    }
}

/// Answer text with citation badges, document summaries and references
pub fn render_message(message: &ChatMessage) -> String {
    let mut out = String::new();

    if message.role != Role::Assistant {
        out.push_str(&message.content);
        out.push('\n');
        return out;
    }

    let resolver = CitationResolver::from_message(message);
    for segment in resolver.segments() {
        match segment {
            AnswerSegment::Text(text) => out.push_str(&text),
            AnswerSegment::Badge { number, .. } => out.push_str(&format!("[{}]", number)),
        }
    }
    out.push('\n');

    if message.response_type == ResponseType::Summary {
        if let Some(summaries) = &message.document_summaries {
            out.push_str("\nDocument summaries:\n");
            for summary in summaries {
                out.push_str(&format!("  • {}: {}\n", summary.name, summary.summary));
            }
        }
    }

    let references = resolver.references();
    if !references.is_empty() {
        out.push_str("\nReferences:\n");
        for group in references {
            let pages: Vec<String> = group.pages.iter().map(u32::to_string).collect();
            let markers: String = group.numbers.iter().map(|n| format!("[{}]", n)).collect();
            out.push_str(&format!(
                "  {} {}, p. {}\n",
                markers,
                group.pdf_name,
                pages.join(", ")
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CitationData, DocumentSummary};

    fn citation(label: &str, pdf: &str, page: u32) -> CitationData {
        CitationData {
            label: label.to_string(),
            pdf_name: pdf.to_string(),
            page,
            chunk_id: format!("c{}", label),
            score: 0.7,
            chunk_text: None,
        }
    }

    #[test]
    fn test_render_answer_with_references() {
        let mut message = ChatMessage::assistant_placeholder("");
        message.is_streaming = false;
        message.content = "Revenue grew [1, 2]. Costs fell [4].".to_string();
        message.citations = Some(vec![
            citation("1", "report.pdf", 4),
            citation("2", "report.pdf", 2),
            citation("3", "other.pdf", 1),
        ]);

        let rendered = render_message(&message);
        assert_eq!(
            rendered,
            "Revenue grew [1][2]. Costs fell [4].\n\nReferences:\n  [1][2] report.pdf, p. 2, 4\n"
        );
    }

    #[test]
    fn test_render_summary_response() {
        let mut message = ChatMessage::assistant_placeholder("");
        message.content = "Two documents.".to_string();
        message.response_type = ResponseType::Summary;
        message.document_summaries = Some(vec![DocumentSummary {
            name: "a.pdf".to_string(),
            summary: "About A".to_string(),
        }]);

        let rendered = render_message(&message);
        assert!(rendered.contains("Document summaries:\n  • a.pdf: About A\n"));
    }

    #[test]
    fn test_render_user_message_verbatim() {
        let message = ChatMessage::user("What about [1]?");
        assert_eq!(render_message(&message), "What about [1]?\n");
    }
}

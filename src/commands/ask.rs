//! Ask command: stream an answer into a chat

use super::docs::load_documents;
use crate::api::{validate_title, BackendClient, MessagePersistence, StreamSource};
use crate::autocomplete::AutocompleteEngine;
use crate::cache::LocalCache;
use crate::citations::{CitationPopover, CitationResolver, ReferenceGroup};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{ChatMessage, Document};
use crate::progress::add_status_spinner;
use crate::stream::{DocumentScope, MessageStore, StreamController, StreamOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub question: String,
    /// Existing chat to continue; a new chat is created otherwise
    pub chat_id: Option<String>,
    /// Explicitly selected documents, by id or name
    pub documents: Vec<String>,
    pub refresh_documents: bool,
    pub show_progress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResult {
    pub chat_id: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: ChatMessage,
    pub references: Vec<ReferenceGroup>,
    pub sources: Vec<CitationPopover>,
}

/// Ask a question and stream the answer into a chat
pub async fn cmd_ask(
    config: &Config,
    client: Arc<BackendClient>,
    source: Arc<dyn StreamSource>,
    cache: Option<Arc<LocalCache>>,
    options: AskOptions,
) -> Result<AskResult> {
    let question = options.question.trim().to_string();
    if question.is_empty() {
        return Err(Error::Validation("Question cannot be empty".to_string()));
    }

    let mut engine = AutocompleteEngine::new(config, client.user_id(), cache.clone());
    match load_documents(config, &client, cache.as_deref(), options.refresh_documents).await {
        Ok(documents) => engine.set_documents(documents).await,
        Err(e) if e.is_transport() && engine.load_cached_names().await => {
            warn!("Using cached document names: {}", e);
        }
        Err(e) => return Err(e),
    }

    let selected_ids = resolve_selected(&engine, &options.documents)?;
    let scope = DocumentScope::resolve(&question, &selected_ids, engine.documents());
    debug!(
        "Question scoped to {} documents ({} selected, {} tagged)",
        scope.document_ids.len(),
        selected_ids.len(),
        scope.tagged_count
    );

    let (chat_id, history) = match &options.chat_id {
        Some(chat_id) => {
            let history = client
                .load_messages_or_welcome(chat_id, &config.chat.welcome_message)
                .await;
            (chat_id.clone(), history)
        }
        None => {
            let chat = client
                .create_chat(&chat_title(&question, config.chat.max_title_chars)?)
                .await?;
            (chat.id, Vec::new())
        }
    };

    let store = MessageStore::with_messages(history);
    let user_message = ChatMessage::user(question.clone());
    store.upsert(user_message.clone()).await;
    if let Err(e) = client.save_message(&chat_id, &user_message).await {
        warn!("Failed to save question: {}", e);
    }

    let controller = StreamController::new(
        store.clone(),
        source,
        client.clone(),
        client.user_id(),
        Duration::from_millis(config.stream.fallback_save_ms),
    );

    let assistant_id = Uuid::new_v4().to_string();
    let spinner = options
        .show_progress
        .then(|| spawn_status_spinner(&store, &assistant_id));

    let outcome = controller
        .start_stream(&question, &assistant_id, &chat_id, &scope)
        .await?;
    controller.flush_pending_saves().await;

    if let Some((bar, task)) = spinner {
        task.abort();
        bar.finish_and_clear();
    }

    let message = store
        .get(&assistant_id)
        .await
        .ok_or_else(|| Error::NotFound(format!("message {}", assistant_id)))?;

    let resolver = CitationResolver::from_message(&message);
    let references = resolver.references();
    let sources = resolver
        .used_citations()
        .into_iter()
        .filter_map(|citation| citation.number())
        .filter_map(|n| resolver.popover(n))
        .collect();

    let (outcome, error) = match outcome {
        StreamOutcome::Completed => ("completed", None),
        StreamOutcome::Incomplete => ("incomplete", None),
        StreamOutcome::Failed(error) => ("failed", Some(error)),
    };

    Ok(AskResult {
        chat_id,
        outcome: outcome.to_string(),
        error,
        message,
        references,
        sources,
    })
}

/// Map `--doc` values (ids or names) to document ids
fn resolve_selected(engine: &AutocompleteEngine, wanted: &[String]) -> Result<Vec<String>> {
    let mut ids: Vec<String> = Vec::with_capacity(wanted.len());
    for value in wanted {
        let id = match engine.documents().iter().find(|d: &&Document| d.id == *value) {
            Some(doc) => doc.id.clone(),
            None => engine
                .document_id_for_name(value)
                .map(str::to_string)
                .ok_or_else(|| Error::NotFound(format!("document '{}'", value)))?,
        };
        // An id and a name can point at the same document
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn chat_title(question: &str, max_chars: usize) -> Result<String> {
    let title: String = question.chars().take(max_chars).collect();
    validate_title(&title, max_chars)
}

fn spawn_status_spinner(
    store: &MessageStore,
    message_id: &str,
) -> (indicatif::ProgressBar, tokio::task::JoinHandle<()>) {
    let bar = add_status_spinner("Sending question...");
    let spinner = bar.clone();
    let store = store.clone();
    let message_id = message_id.to_string();
    let mut changes = store.subscribe();

    let task = tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let Some(message) = store.get(&message_id).await else {
                continue;
            };
            if !message.is_streaming {
                break;
            }
            match &message.status {
                Some(status) => spinner.set_message(status.clone()),
                None => spinner.set_message(format!(
                    "Receiving answer ({} characters)",
                    message.content.chars().count()
                )),
            }
        }
    });
    (bar, task)
}

pub fn print_ask_result(result: &AskResult, show_sources: bool) {
    print!("{}", super::chats::render_message(&result.message));

    if show_sources && !result.sources.is_empty() {
        println!("\nSources:");
        for source in &result.sources {
            println!(
                "  [{}] {} p. {} (score: {:.3})",
                source.number, source.pdf_name, source.page, source.score
            );
            if let Some(text) = &source.text {
                println!("      {}", super::preview(text, 200));
            }
        }
    }

    if result.outcome != "completed" {
        eprintln!("\n⚠ Answer {} (chat {})", result.outcome, result.chat_id);
    } else {
        println!("\nChat: {}", result.chat_id);
    }
}

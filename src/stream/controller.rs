//! Streaming response controller
//!
//! Owns the single streaming slot of a chat session. While a message owns
//! the slot, its text lives in a side buffer that only this controller
//! appends to; the stored message content is always rebuilt from that
//! buffer, so a stale copy written back into the store is overwritten by
//! the next event.

use super::event::{parse_sse_line, DonePayload, ParsedLine, SseDecoder, StreamEvent};
use super::store::MessageStore;
use super::{DocumentScope, PLACEHOLDER_STATUS};
use crate::api::{ByteStream, MessagePersistence, StreamRequest, StreamSource};
use crate::error::{Error, Result};
use crate::models::{CitationData, ChatMessage, SourceData};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A `done` event arrived and the answer was finalized
    Completed,
    /// The server or the transport failed; the message carries the error
    Failed(String),
    /// The body ended without a terminal event
    Incomplete,
}

#[derive(Default)]
struct ControllerState {
    streaming_message_id: Option<String>,
    buffers: HashMap<String, String>,
    saved: HashSet<String>,
    failed: HashSet<String>,
    fallback_saves: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct StreamController {
    store: MessageStore,
    source: Arc<dyn StreamSource>,
    persistence: Arc<dyn MessagePersistence>,
    user_id: String,
    fallback_delay: Duration,
    state: Arc<Mutex<ControllerState>>,
}

impl StreamController {
    pub fn new(
        store: MessageStore,
        source: Arc<dyn StreamSource>,
        persistence: Arc<dyn MessagePersistence>,
        user_id: &str,
        fallback_delay: Duration,
    ) -> Self {
        Self {
            store,
            source,
            persistence,
            user_id: user_id.to_string(),
            fallback_delay,
            state: Arc::new(Mutex::new(ControllerState::default())),
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Id of the message currently owning the streaming slot
    pub async fn streaming_message_id(&self) -> Option<String> {
        self.state.lock().await.streaming_message_id.clone()
    }

    pub async fn is_streaming(&self) -> bool {
        self.state.lock().await.streaming_message_id.is_some()
    }

    /// Stream the answer to `question` into message `target_message_id`.
    ///
    /// Fails only with [`Error::StreamBusy`] when another message owns the
    /// slot. Every other failure is folded into the target message and
    /// reported through the returned [`StreamOutcome`].
    pub async fn start_stream(
        &self,
        question: &str,
        target_message_id: &str,
        chat_id: &str,
        scope: &DocumentScope,
    ) -> Result<StreamOutcome> {
        self.claim_slot(target_message_id).await?;
        self.prepare_placeholder(target_message_id).await;

        let (finished_tx, finished_rx) = watch::channel(false);
        self.arm_fallback_save(chat_id, target_message_id, finished_rx)
            .await;

        let request = StreamRequest::new(question, &self.user_id, scope.document_ids.clone());
        let outcome = match self.source.open(&request).await {
            Ok(stream) => {
                self.consume(stream, target_message_id, chat_id, scope)
                    .await
            }
            Err(e) => {
                warn!("Failed to open chat stream: {}", e);
                let message = e.to_string();
                self.fail_message(target_message_id, &message).await;
                StreamOutcome::Failed(message)
            }
        };

        let _ = finished_tx.send(true);
        Ok(outcome)
    }

    async fn claim_slot(&self, message_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(current) = &state.streaming_message_id {
            return Err(Error::StreamBusy(current.clone()));
        }
        state.streaming_message_id = Some(message_id.to_string());
        state.buffers.insert(message_id.to_string(), String::new());
        state.failed.remove(message_id);
        Ok(())
    }

    async fn prepare_placeholder(&self, message_id: &str) {
        let existed = self
            .store
            .update_by_id(message_id, |m| {
                m.content.clear();
                m.is_streaming = true;
                m.status = Some(PLACEHOLDER_STATUS.to_string());
            })
            .await;
        if !existed {
            let mut placeholder = ChatMessage::assistant_placeholder(PLACEHOLDER_STATUS);
            placeholder.id = message_id.to_string();
            self.store.upsert(placeholder).await;
        }
    }

    async fn arm_fallback_save(
        &self,
        chat_id: &str,
        message_id: &str,
        mut finished: watch::Receiver<bool>,
    ) {
        let controller = self.clone();
        let chat_id = chat_id.to_string();
        let message_id = message_id.to_string();
        let delay = self.fallback_delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Never persist a half-streamed answer
            if finished.wait_for(|done| *done).await.is_err() {
                debug!("Stream for {} dropped before finishing", message_id);
            }
            if controller.save_once(&chat_id, &message_id).await {
                info!("Fallback save persisted message {}", message_id);
            }
        });
        self.state.lock().await.fallback_saves.push(handle);
    }

    async fn consume(
        &self,
        mut stream: ByteStream,
        message_id: &str,
        chat_id: &str,
        scope: &DocumentScope,
    ) -> StreamOutcome {
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Chat stream interrupted: {}", e);
                    let message = e.to_string();
                    self.fail_message(message_id, &message).await;
                    return StreamOutcome::Failed(message);
                }
            };
            for line in decoder.push(&bytes) {
                if let Some(outcome) = self.handle_line(&line, message_id, chat_id, scope).await {
                    return outcome;
                }
            }
        }

        if let Some(line) = decoder.finish() {
            if let Some(outcome) = self.handle_line(&line, message_id, chat_id, scope).await {
                return outcome;
            }
        }

        warn!("Chat stream for {} ended without a done event", message_id);
        self.finish_incomplete(message_id).await;
        StreamOutcome::Incomplete
    }

    async fn handle_line(
        &self,
        line: &str,
        message_id: &str,
        chat_id: &str,
        scope: &DocumentScope,
    ) -> Option<StreamOutcome> {
        match parse_sse_line(line) {
            ParsedLine::Event(event) => self.apply_event(event, message_id, chat_id, scope).await,
            ParsedLine::Skip => None,
            ParsedLine::Malformed { data, error } => {
                warn!("Skipping malformed stream line ({}): {}", error, data);
                None
            }
        }
    }

    /// Apply one event to the target message; returns the outcome once a
    /// terminal event has been handled.
    async fn apply_event(
        &self,
        event: StreamEvent,
        message_id: &str,
        chat_id: &str,
        scope: &DocumentScope,
    ) -> Option<StreamOutcome> {
        match event {
            StreamEvent::Sources { sources } => {
                debug!("Received {} sources", sources.len());
                self.store
                    .update_by_id(message_id, |m| {
                        m.sources = Some(sources);
                        m.status = None;
                    })
                    .await;
                None
            }
            StreamEvent::Token { content } => {
                let text = {
                    let mut state = self.state.lock().await;
                    let buffer = state.buffers.entry(message_id.to_string()).or_default();
                    buffer.push_str(&content);
                    buffer.clone()
                };
                self.store
                    .update_by_id(message_id, |m| {
                        m.content = text;
                        m.status = None;
                    })
                    .await;
                None
            }
            StreamEvent::Status { message } => {
                if let Some(server_status) = message {
                    debug!("Server status: {}", server_status);
                }
                let status = scope.status_message();
                self.store
                    .update_by_id(message_id, |m| m.status = Some(status))
                    .await;
                None
            }
            StreamEvent::Done(payload) => {
                self.complete(message_id, chat_id, payload).await;
                Some(StreamOutcome::Completed)
            }
            StreamEvent::Error { message } => {
                let message = message.unwrap_or_else(|| "the server reported an error".to_string());
                warn!("Chat stream error: {}", message);
                self.fail_message(message_id, &message).await;
                Some(StreamOutcome::Failed(message))
            }
            StreamEvent::Unknown => {
                debug!("Ignoring unknown stream event");
                None
            }
        }
    }

    async fn complete(&self, message_id: &str, chat_id: &str, payload: DonePayload) {
        let buffered = self.release_slot(message_id).await;
        let content = payload
            .full_response
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(buffered);
        let mut citations: Vec<CitationData> = payload
            .citations
            .unwrap_or_default()
            .into_iter()
            .map(CitationData::normalized)
            .collect();

        self.store
            .update_by_id(message_id, |m| {
                let sources = payload.sources.or_else(|| m.sources.take());
                if citations.is_empty() {
                    citations = sources
                        .iter()
                        .flatten()
                        .filter_map(SourceData::to_citation)
                        .collect();
                }

                m.content = content;
                m.sources = sources;
                m.citations = (!citations.is_empty()).then_some(citations);
                if payload.reasoning.is_some() {
                    m.reasoning = payload.reasoning;
                }
                if let Some(response_type) = payload.response_type {
                    m.response_type = response_type;
                }
                if payload.document_summaries.is_some() {
                    m.document_summaries = payload.document_summaries;
                }
                if payload.document_count.is_some() {
                    m.document_count = payload.document_count;
                }
                m.is_streaming = false;
                m.status = None;
            })
            .await;

        self.save_once(chat_id, message_id).await;
    }

    /// Freeze the message with an error string; it is never persisted
    async fn fail_message(&self, message_id: &str, error: &str) {
        self.release_slot(message_id).await;
        self.state
            .lock()
            .await
            .failed
            .insert(message_id.to_string());

        let content = format!("Error: {}", error);
        self.store
            .update_by_id(message_id, |m| {
                m.content = content;
                m.is_streaming = false;
                m.status = None;
            })
            .await;
    }

    /// Freeze whatever arrived before the body ended; the fallback timer
    /// persists it.
    async fn finish_incomplete(&self, message_id: &str) {
        let buffered = self.release_slot(message_id).await;
        self.store
            .update_by_id(message_id, |m| {
                m.content = buffered;
                m.is_streaming = false;
                m.status = None;
            })
            .await;
    }

    /// Drop the side buffer and clear the slot; returns the buffered text
    async fn release_slot(&self, message_id: &str) -> String {
        let mut state = self.state.lock().await;
        if state.streaming_message_id.as_deref() == Some(message_id) {
            state.streaming_message_id = None;
        }
        state.buffers.remove(message_id).unwrap_or_default()
    }

    /// Persist message `message_id` unless it was already saved.
    ///
    /// Returns true when this call performed the save. Streaming, failed
    /// and empty messages are skipped.
    pub async fn save_once(&self, chat_id: &str, message_id: &str) -> bool {
        let Some(message) = self.store.get(message_id).await else {
            return false;
        };
        if message.is_streaming || message.content.trim().is_empty() {
            debug!("Message {} is not ready to persist", message_id);
            return false;
        }

        {
            let mut state = self.state.lock().await;
            if state.failed.contains(message_id) || !state.saved.insert(message_id.to_string()) {
                return false;
            }
        }

        if let Err(e) = self.persistence.save_message(chat_id, &message).await {
            warn!("Failed to persist message {}: {}", message_id, e);
        } else {
            debug!("Persisted message {}", message_id);
        }
        true
    }

    /// Wait for every armed fallback save to run
    pub async fn flush_pending_saves(&self) {
        let handles = std::mem::take(&mut self.state.lock().await.fallback_saves);
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Fallback save task failed: {}", e);
                }
            }
        }
    }

    /// Cancel pending fallback saves and clear all streaming state
    pub async fn teardown(&self) {
        let mut state = self.state.lock().await;
        for handle in state.fallback_saves.drain(..) {
            handle.abort();
        }
        state.buffers.clear();
        state.streaming_message_id = None;
    }
}

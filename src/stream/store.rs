//! Shared, ordered list of chat messages
//!
//! All mutations go through [`MessageStore::update_by_id`] or
//! [`MessageStore::upsert`], which address a message by id against the
//! current list. A caller holding an old snapshot can never write it back
//! over newer state.

use crate::models::ChatMessage;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: Arc<RwLock<Vec<ChatMessage>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::with_messages(Vec::new())
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<ChatMessage>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            messages: Arc::new(RwLock::new(messages)),
            revision: Arc::new(revision),
        }
    }

    /// Receiver that is notified after every mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Append a message, or merge it into the existing one with the same id
    pub async fn upsert(&self, message: ChatMessage) {
        {
            let mut messages = self.messages.write().await;
            match messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message,
                None => messages.push(message),
            }
        }
        self.bump();
    }

    /// Apply `f` to the current version of message `id`.
    ///
    /// Returns false when no such message exists.
    pub async fn update_by_id<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut ChatMessage),
    {
        let updated = match self.messages.write().await.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        };
        if updated {
            self.bump();
        } else {
            trace!("No message {} to update", id);
        }
        updated
    }

    pub async fn get(&self, id: &str) -> Option<ChatMessage> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub async fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

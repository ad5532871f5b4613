//! "@" mention autocomplete over the user's documents
//!
//! This module handles:
//! - Detecting an in-progress mention that ends at the cursor
//! - Filtering and ranking candidate documents, with query caching
//! - Keyboard-driven selection and committing a `@-name ` tag
//! - Debounced re-evaluation through a [`Scheduler`]

mod scheduler;

pub use scheduler::*;

use crate::cache::LocalCache;
use crate::config::Config;
use crate::models::{Document, DocumentStatus};
use crate::tags::{byte_to_char, char_to_byte, TAG_PREFIX};
use futures::FutureExt;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace, warn};

fn trigger_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@-?([\w\s.\-]*)$").expect("valid trigger regex"))
}

/// Extent of an in-progress mention, in character offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPosition {
    /// Offset of the `@`
    pub start: usize,
    /// Offset of the cursor
    pub end: usize,
    pub query: String,
}

/// Find a mention that ends exactly at `cursor`.
///
/// Only the text before the cursor is considered, and the `@` or `@-` must
/// be followed by nothing but word, space, dot or hyphen characters up to
/// the cursor.
pub fn detect_trigger(text: &str, cursor: usize) -> Option<TriggerPosition> {
    let cursor_byte = char_to_byte(text, cursor);
    let before = &text[..cursor_byte];
    let caps = trigger_re().captures(before)?;
    let whole = caps.get(0)?;
    let query = caps.get(1).map_or("", |m| m.as_str());

    Some(TriggerPosition {
        start: byte_to_char(before, whole.start()),
        end: byte_to_char(before, before.len()),
        query: query.to_string(),
    })
}

/// Whether evaluating this input should wait for the debounce window.
///
/// Typing `@`/`@-` or having an empty query gets instant feedback; ordinary
/// keystrokes inside a mention are coalesced.
pub fn needs_debounce(text: &str, cursor: usize) -> bool {
    let cursor_byte = char_to_byte(text, cursor);
    let before = &text[..cursor_byte];
    if before.ends_with('@') || before.ends_with(TAG_PREFIX) {
        return false;
    }
    match detect_trigger(text, cursor) {
        Some(trigger) => !trigger.query.is_empty(),
        None => true,
    }
}

/// Documents whose name contains `query` (case-insensitive), ranked exact
/// match first, then prefix matches, then other matches, capped at
/// `max_results`. The sort is stable so list order breaks ties.
pub fn filter_documents(documents: &[Document], query: &str, max_results: usize) -> Vec<Document> {
    let query = query.to_lowercase();
    let mut ranked: Vec<(u8, &Document)> = documents
        .iter()
        .filter_map(|doc| {
            let name = doc.name.to_lowercase();
            if query.is_empty() {
                Some((2, doc))
            } else if name == query {
                Some((0, doc))
            } else if name.starts_with(&query) {
                Some((1, doc))
            } else if name.contains(&query) {
                Some((2, doc))
            } else {
                None
            }
        })
        .collect();

    ranked.sort_by_key(|(rank, _)| *rank);
    ranked
        .into_iter()
        .take(max_results)
        .map(|(_, doc)| doc.clone())
        .collect()
}

/// Observable autocomplete state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutocompleteState {
    pub is_open: bool,
    pub filtered_documents: Vec<Document>,
    pub selected_index: usize,
    pub trigger_position: Option<TriggerPosition>,
}

/// Keys the dropdown reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    ArrowDown,
    ArrowUp,
    Enter,
    Tab,
    Escape,
    Other,
}

/// Buffer contents after a suggestion was committed
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub cursor: usize,
    pub document: Document,
}

/// What a key press did
#[derive(Debug, Clone, PartialEq)]
pub enum KeyOutcome {
    /// Not for us: the host handles the key normally
    Ignored,
    /// Consumed (selection moved or dropdown closed)
    Handled,
    /// Consumed and a suggestion was committed
    Committed(Completion),
}

impl KeyOutcome {
    /// Consumed keys must not insert text or newlines and must not reach
    /// parent handlers
    pub fn prevents_default(&self) -> bool {
        !matches!(self, KeyOutcome::Ignored)
    }
}

/// Autocomplete engine for one user's document list
pub struct AutocompleteEngine {
    user_id: String,
    max_results: usize,
    query_ttl: Duration,
    name_map_ttl: Duration,
    cache: Option<Arc<LocalCache>>,
    documents: Vec<Document>,
    fingerprint: Option<String>,
    name_to_id: HashMap<String, String>,
    query_cache: HashMap<(String, String), Vec<Document>>,
    text: String,
    state: AutocompleteState,
}

impl AutocompleteEngine {
    pub fn new(config: &Config, user_id: &str, cache: Option<Arc<LocalCache>>) -> Self {
        Self {
            user_id: user_id.to_string(),
            max_results: config.autocomplete.max_results,
            query_ttl: config.cache.query_ttl(),
            name_map_ttl: config.cache.name_map_ttl(),
            cache,
            documents: Vec::new(),
            fingerprint: None,
            name_to_id: HashMap::new(),
            query_cache: HashMap::new(),
            text: String::new(),
            state: AutocompleteState::default(),
        }
    }

    fn key_prefix(&self) -> String {
        format!("autocomplete:{}:", self.user_id)
    }

    fn query_key(&self, query: &str) -> String {
        format!("{}q:{}", self.key_prefix(), query)
    }

    fn names_key(&self) -> String {
        format!("{}names", self.key_prefix())
    }

    fn fingerprint_key(&self) -> String {
        format!("{}fingerprint", self.key_prefix())
    }

    pub fn state(&self) -> &AutocompleteState {
        &self.state
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Replace the document list. When the list differs from the current
    /// one, every derived map and cached query result is rebuilt from
    /// scratch.
    pub async fn set_documents(&mut self, documents: Vec<Document>) {
        let fingerprint = document_fingerprint(&documents);
        if self.fingerprint.as_deref() == Some(fingerprint.as_str()) {
            trace!("Document list unchanged, keeping autocomplete caches");
            return;
        }

        debug!(
            "Rebuilding autocomplete index for {} documents",
            documents.len()
        );
        self.documents = documents;
        self.query_cache.clear();
        self.name_to_id = self
            .documents
            .iter()
            .map(|d| (d.name.to_lowercase(), d.id.clone()))
            .collect();

        if let Some(cache) = self.cache.clone() {
            let stored: Option<String> = cache
                .get(&self.fingerprint_key())
                .await
                .unwrap_or_else(|e| {
                    warn!("Autocomplete cache read failed: {}", e);
                    None
                });

            if stored.as_deref() != Some(fingerprint.as_str()) {
                if let Err(e) = cache.remove_prefix(&self.key_prefix()).await {
                    warn!("Failed to invalidate autocomplete cache: {}", e);
                }
            }

            let names: Vec<(String, String)> = self
                .documents
                .iter()
                .map(|d| (d.name.clone(), d.id.clone()))
                .collect();
            let writes = [
                cache
                    .set(&self.names_key(), &names, self.name_map_ttl)
                    .await,
                cache
                    .set(&self.fingerprint_key(), &fingerprint, self.name_map_ttl)
                    .await,
            ];
            for result in writes {
                if let Err(e) = result {
                    warn!("Failed to cache document names: {}", e);
                }
            }
        }

        self.fingerprint = Some(fingerprint);
        self.close();
    }

    /// Seed the name map (and a minimal document list) from the cache when
    /// the live list is unavailable. Returns whether anything was loaded.
    pub async fn load_cached_names(&mut self) -> bool {
        if !self.documents.is_empty() {
            return true;
        }
        let Some(cache) = self.cache.clone() else {
            return false;
        };

        let names: Vec<(String, String)> = match cache.get(&self.names_key()).await {
            Ok(Some(names)) => names,
            Ok(None) => return false,
            Err(e) => {
                warn!("Autocomplete cache read failed: {}", e);
                return false;
            }
        };

        debug!("Loaded {} document names from cache", names.len());
        self.name_to_id = names
            .iter()
            .map(|(name, id)| (name.to_lowercase(), id.clone()))
            .collect();
        self.documents = names
            .into_iter()
            .map(|(name, id)| Document {
                id,
                name,
                user_id: self.user_id.clone(),
                file_size: 0,
                created_at: String::new(),
                status: DocumentStatus::Completed,
            })
            .collect();
        true
    }

    /// Resolve a document name (case-insensitive) to its id
    pub fn document_id_for_name(&self, name: &str) -> Option<&str> {
        self.name_to_id
            .get(&name.to_lowercase())
            .map(String::as_str)
    }

    /// Re-evaluate the dropdown for the current text and cursor
    pub async fn update(&mut self, text: &str, cursor: usize) -> &AutocompleteState {
        self.text = text.to_string();

        let Some(trigger) = detect_trigger(text, cursor) else {
            self.close();
            return &self.state;
        };

        let same_query = self
            .state
            .trigger_position
            .as_ref()
            .is_some_and(|prev| prev.query == trigger.query && prev.start == trigger.start);

        let filtered = self.filter(&trigger.query).await;
        let selected_index = if same_query && self.state.selected_index < filtered.len() {
            self.state.selected_index
        } else {
            0
        };

        self.state = AutocompleteState {
            is_open: !filtered.is_empty(),
            filtered_documents: filtered,
            selected_index,
            trigger_position: Some(trigger),
        };
        &self.state
    }

    async fn filter(&mut self, query: &str) -> Vec<Document> {
        let lower = query.to_lowercase();
        let memo_key = (self.user_id.clone(), lower.clone());

        if let Some(hit) = self.query_cache.get(&memo_key) {
            trace!("Autocomplete memory hit for '{}'", lower);
            return hit.clone();
        }

        if let Some(cache) = self.cache.clone() {
            match cache.get::<Vec<Document>>(&self.query_key(&lower)).await {
                Ok(Some(hit)) => {
                    trace!("Autocomplete cache hit for '{}'", lower);
                    self.query_cache.insert(memo_key, hit.clone());
                    return hit;
                }
                Ok(None) => {}
                Err(e) => warn!("Autocomplete cache read failed: {}", e),
            }
        }

        let filtered = filter_documents(&self.documents, &lower, self.max_results);
        self.query_cache.insert(memo_key, filtered.clone());

        if let Some(cache) = self.cache.clone() {
            if let Err(e) = cache
                .set(&self.query_key(&lower), &filtered, self.query_ttl)
                .await
            {
                warn!("Failed to cache autocomplete results: {}", e);
            }
        }

        filtered
    }

    /// Apply a key press while the dropdown may be open
    pub fn handle_key_down(&mut self, key: Key) -> KeyOutcome {
        if !self.state.is_open || self.state.filtered_documents.is_empty() {
            return KeyOutcome::Ignored;
        }

        let len = self.state.filtered_documents.len();
        match key {
            Key::ArrowDown => {
                self.state.selected_index = (self.state.selected_index + 1) % len;
                KeyOutcome::Handled
            }
            Key::ArrowUp => {
                self.state.selected_index = (self.state.selected_index + len - 1) % len;
                KeyOutcome::Handled
            }
            Key::Enter | Key::Tab => {
                let document = self.state.filtered_documents[self.state.selected_index].clone();
                match self.handle_select(&document) {
                    Some(completion) => KeyOutcome::Committed(completion),
                    None => KeyOutcome::Handled,
                }
            }
            Key::Escape => {
                self.close();
                KeyOutcome::Handled
            }
            Key::Other => KeyOutcome::Ignored,
        }
    }

    /// Replace the trigger span with `@-{name} ` and close the dropdown
    pub fn handle_select(&mut self, document: &Document) -> Option<Completion> {
        let trigger = self.state.trigger_position.clone()?;
        let start = char_to_byte(&self.text, trigger.start);
        let end = char_to_byte(&self.text, trigger.end);
        let inserted = format!("{}{} ", TAG_PREFIX, document.name);

        let mut text = String::with_capacity(self.text.len() + inserted.len());
        text.push_str(&self.text[..start]);
        text.push_str(&inserted);
        text.push_str(&self.text[end..]);

        let cursor = trigger.start + inserted.chars().count();
        self.text = text.clone();
        self.close();

        Some(Completion {
            text,
            cursor,
            document: document.clone(),
        })
    }

    pub fn close(&mut self) {
        self.state = AutocompleteState::default();
    }
}

/// Identity of a document list, used to decide when caches are stale
fn document_fingerprint(documents: &[Document]) -> String {
    let mut hasher = blake3::Hasher::new();
    for doc in documents {
        hasher.update(doc.id.as_bytes());
        hasher.update(&[0]);
        hasher.update(doc.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(doc.status.to_string().as_bytes());
        hasher.update(&[0xff]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Debounced front end for an [`AutocompleteEngine`].
///
/// Each input cancels any pending evaluation; instant inputs run at once,
/// others run after the debounce window. State changes are published on a
/// watch channel.
pub struct AutocompleteSession<S: Scheduler = TokioScheduler> {
    engine: Arc<Mutex<AutocompleteEngine>>,
    scheduler: S,
    debounce: Duration,
    pending: Option<ScheduledTask>,
    state_tx: watch::Sender<AutocompleteState>,
}

impl<S: Scheduler> AutocompleteSession<S> {
    pub fn new(engine: AutocompleteEngine, scheduler: S, debounce: Duration) -> Self {
        let (state_tx, _) = watch::channel(engine.state().clone());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            scheduler,
            debounce,
            pending: None,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AutocompleteState> {
        self.state_tx.subscribe()
    }

    pub fn engine(&self) -> Arc<Mutex<AutocompleteEngine>> {
        self.engine.clone()
    }

    fn cancel_pending(&mut self) {
        if let Some(task) = self.pending.take() {
            task.cancel();
        }
    }

    /// Feed a keystroke/cursor move. Returns `true` when it was evaluated
    /// immediately rather than deferred.
    pub async fn input(&mut self, text: &str, cursor: usize) -> bool {
        self.cancel_pending();

        if !needs_debounce(text, cursor) {
            let mut engine = self.engine.lock().await;
            let state = engine.update(text, cursor).await.clone();
            self.state_tx.send_replace(state);
            return true;
        }

        let engine = self.engine.clone();
        let state_tx = self.state_tx.clone();
        let text = text.to_string();
        let task = async move {
            let mut engine = engine.lock().await;
            let state = engine.update(&text, cursor).await.clone();
            state_tx.send_replace(state);
        }
        .boxed();

        self.pending = Some(self.scheduler.schedule(self.debounce, task));
        false
    }

    pub async fn handle_key_down(&mut self, key: Key) -> KeyOutcome {
        let mut engine = self.engine.lock().await;
        let outcome = engine.handle_key_down(key);
        if outcome.prevents_default() {
            self.state_tx.send_replace(engine.state().clone());
        }
        outcome
    }

    pub async fn close(&mut self) {
        self.cancel_pending();
        let mut engine = self.engine.lock().await;
        engine.close();
        self.state_tx.send_replace(engine.state().clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

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

    fn sample_docs() -> Vec<Document> {
        vec![
            doc("d1", "Annual report.pdf"),
            doc("d2", "report"),
            doc("d3", "Report 2024.pdf"),
            doc("d4", "Budget.pdf"),
        ]
    }

    async fn engine_with_docs() -> AutocompleteEngine {
        let mut engine = AutocompleteEngine::new(&Config::default(), "u1", None);
        engine.set_documents(sample_docs()).await;
        engine
    }

    #[test]
    fn test_detect_trigger_at_cursor() {
        let trigger = detect_trigger("hello @doc", 10).unwrap();
        assert_eq!(
            trigger,
            TriggerPosition {
                start: 6,
                end: 10,
                query: "doc".to_string()
            }
        );
    }

    #[test]
    fn test_detect_trigger_anchors_to_cursor() {
        assert!(detect_trigger("hello@doc", 3).is_none());

        let trigger = detect_trigger("hello@doc", 7).unwrap();
        assert_eq!(trigger.start, 5);
        assert_eq!(trigger.end, 7);
        assert_eq!(trigger.query, "d");

        assert!(detect_trigger("mail me@x, thanks", 17).is_none());
    }

    #[test]
    fn test_detect_trigger_with_dash_prefix() {
        let trigger = detect_trigger("see @-Rep", 9).unwrap();
        assert_eq!(trigger.start, 4);
        assert_eq!(trigger.query, "Rep");

        let trigger = detect_trigger("see @", 5).unwrap();
        assert_eq!(trigger.query, "");
    }

    #[test]
    fn test_needs_debounce() {
        assert!(!needs_debounce("hi @", 4));
        assert!(!needs_debounce("hi @-", 5));
        assert!(needs_debounce("hi @rep", 7));
    }

    #[test]
    fn test_filter_ranking() {
        let docs = sample_docs();
        let names: Vec<String> = filter_documents(&docs, "REPORT", 20)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["report", "Report 2024.pdf", "Annual report.pdf"]);

        assert_eq!(filter_documents(&docs, "", 20).len(), 4);
        assert_eq!(filter_documents(&docs, "", 2).len(), 2);
        assert!(filter_documents(&docs, "zzz", 20).is_empty());
    }

    #[tokio::test]
    async fn test_keyboard_cycles_and_commits() {
        let mut engine = engine_with_docs().await;
        let text = "compare @rep";
        let state = engine.update(text, 12).await;
        assert!(state.is_open);
        assert_eq!(state.filtered_documents.len(), 3);

        assert_eq!(engine.handle_key_down(Key::ArrowUp), KeyOutcome::Handled);
        assert_eq!(engine.state().selected_index, 2);
        assert_eq!(engine.handle_key_down(Key::ArrowDown), KeyOutcome::Handled);
        assert_eq!(engine.state().selected_index, 0);
        engine.handle_key_down(Key::ArrowDown);

        match engine.handle_key_down(Key::Enter) {
            KeyOutcome::Committed(completion) => {
                assert_eq!(completion.text, "compare @-Report 2024.pdf ");
                assert_eq!(completion.cursor, completion.text.chars().count());
                assert_eq!(completion.document.id, "d3");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!engine.state().is_open);
        assert_eq!(engine.handle_key_down(Key::Enter), KeyOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_escape_closes_without_commit() {
        let mut engine = engine_with_docs().await;
        engine.update("@bud", 4).await;

        let outcome = engine.handle_key_down(Key::Escape);
        assert!(outcome.prevents_default());
        assert!(!engine.state().is_open);
        assert_eq!(engine.handle_key_down(Key::Other), KeyOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_commit_keeps_text_after_cursor() {
        let mut engine = engine_with_docs().await;
        engine.update("a @bu and more", 5).await;

        let completion = engine.handle_select(&doc("d4", "Budget.pdf")).unwrap();
        assert_eq!(completion.text, "a @-Budget.pdf  and more");
        assert_eq!(completion.cursor, 15);
    }

    #[tokio::test]
    async fn test_name_lookup_and_rebuild() {
        let mut engine = engine_with_docs().await;
        assert_eq!(engine.document_id_for_name("BUDGET.PDF"), Some("d4"));

        engine.set_documents(vec![doc("d9", "Other.pdf")]).await;
        assert_eq!(engine.document_id_for_name("budget.pdf"), None);
        assert_eq!(engine.update("@rep", 4).await.filtered_documents.len(), 0);
        assert!(!engine.state().is_open);
    }

    #[tokio::test]
    async fn test_query_results_persist_in_cache() {
        let cache = Arc::new(LocalCache::in_memory(&CacheConfig::default()).await.unwrap());

        let mut engine = AutocompleteEngine::new(&Config::default(), "u1", Some(cache.clone()));
        engine.set_documents(sample_docs()).await;
        engine.update("@bud", 4).await;

        let cached: Option<Vec<Document>> = cache.get("autocomplete:u1:q:bud").await.unwrap();
        assert_eq!(cached.unwrap()[0].id, "d4");

        // Same list in a fresh engine keeps the persisted results
        let mut fresh = AutocompleteEngine::new(&Config::default(), "u1", Some(cache.clone()));
        fresh.set_documents(sample_docs()).await;
        let cached: Option<Vec<Document>> = cache.get("autocomplete:u1:q:bud").await.unwrap();
        assert!(cached.is_some());

        // A different list invalidates them
        fresh.set_documents(vec![doc("d9", "Other.pdf")]).await;
        let cached: Option<Vec<Document>> = cache.get("autocomplete:u1:q:bud").await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_load_cached_names() {
        let cache = Arc::new(LocalCache::in_memory(&CacheConfig::default()).await.unwrap());
        let mut engine = AutocompleteEngine::new(&Config::default(), "u1", Some(cache.clone()));
        engine.set_documents(sample_docs()).await;

        let mut offline = AutocompleteEngine::new(&Config::default(), "u1", Some(cache));
        assert!(offline.load_cached_names().await);
        assert_eq!(offline.documents().len(), 4);
        assert_eq!(offline.document_id_for_name("report"), Some("d2"));
    }

    #[tokio::test]
    async fn test_session_debounces_ordinary_keystrokes() {
        let engine = engine_with_docs().await;
        let mut session =
            AutocompleteSession::new(engine, TokioScheduler, Duration::from_millis(30));
        let rx = session.subscribe();

        assert!(session.input("@", 1).await);
        assert!(rx.borrow().is_open);
        assert_eq!(rx.borrow().filtered_documents.len(), 4);

        assert!(!session.input("@b", 2).await);
        assert!(!session.input("@bu", 3).await);
        assert_eq!(rx.borrow().filtered_documents.len(), 4);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let state = rx.borrow().clone();
        assert_eq!(state.filtered_documents.len(), 1);
        assert_eq!(state.trigger_position.unwrap().query, "bu");
    }

    #[tokio::test]
    async fn test_session_close_cancels_pending() {
        let engine = engine_with_docs().await;
        let mut session =
            AutocompleteSession::new(engine, TokioScheduler, Duration::from_millis(30));
        let rx = session.subscribe();

        session.input("@bu", 3).await;
        session.close().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!rx.borrow().is_open);
    }
}

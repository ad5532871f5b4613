//! Default values for configuration

/// Default backend REST API base URL
pub fn default_api_url() -> String {
    std::env::var("KBCHAT_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
}

/// Default ML streaming server base URL
pub fn default_ml_server_url() -> String {
    std::env::var("ML_SERVER_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string())
}

/// Default user id (taken from the environment when present)
pub fn default_user_id() -> String {
    std::env::var("KBCHAT_USER_ID").unwrap_or_default()
}

/// Default REST request timeout
pub fn default_request_timeout() -> u64 {
    30
}

/// Cache schema version; bumping it invalidates every stored entry
pub fn default_cache_version() -> String {
    "1".to_string()
}

/// Default maximum number of cache entries
pub fn default_cache_max_entries() -> usize {
    500
}

/// Default cache storage quota (5 MiB, the usual browser local storage budget)
pub fn default_cache_max_bytes() -> usize {
    5 * 1024 * 1024
}

/// Autocomplete query results live for 5 minutes
pub fn default_query_ttl_secs() -> u64 {
    300
}

/// Document name -> id mapping lives for 10 minutes
pub fn default_name_map_ttl_secs() -> u64 {
    600
}

/// Default maximum autocomplete suggestions
pub fn default_autocomplete_max_results() -> usize {
    20
}

/// Default keystroke debounce window
pub fn default_autocomplete_debounce_ms() -> u64 {
    100
}

/// Delay before the fallback save timer fires
pub fn default_fallback_save_ms() -> u64 {
    1000
}

/// Document status poll interval
pub fn default_upload_poll_interval_ms() -> u64 {
    2000
}

/// Poll attempts before an upload is reported as timed out (~5 minutes)
pub fn default_upload_max_poll_attempts() -> u32 {
    150
}

/// Maximum accepted upload size (50 MiB)
pub fn default_upload_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

/// File extensions accepted for upload
pub fn default_upload_allowed_extensions() -> Vec<String> {
    vec!["pdf".to_string()]
}

/// Maximum chat title length
pub fn default_chat_max_title_chars() -> usize {
    100
}

/// Message shown when a chat cannot be loaded or has no history
pub fn default_welcome_message() -> String {
    "Hello! Upload a document or ask a question about your knowledge base. \
     Type @ to mention a specific document."
        .to_string()
}

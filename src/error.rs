//! Custom error types for kbchat

use thiserror::Error;

/// Main error type for kbchat operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Document already exists: {0}")]
    DuplicateDocument(String),

    #[error("A response is already streaming (message {0})")]
    StreamBusy(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not initialized: run 'kbchat init' first")]
    NotInitialized,

    #[error("Already initialized at {0}")]
    AlreadyInitialized(String),
}

impl Error {
    /// Whether the failure is a recoverable transport/backend problem
    /// (shown to the user, never fatal to the session).
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Api { .. } | Error::Stream(_))
    }
}

/// Result type alias for kbchat
pub type Result<T> = std::result::Result<T, Error>;

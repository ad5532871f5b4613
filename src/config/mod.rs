//! Configuration management for kbchat
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend REST API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// ML streaming server base URL
    #[serde(default = "default_ml_server_url")]
    pub ml_server_url: String,

    /// User the client acts as
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// REST request timeout in seconds (streams are not bounded by it)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Local cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Document autocomplete configuration
    #[serde(default)]
    pub autocomplete: AutocompleteConfig,

    /// Streaming configuration
    #[serde(default)]
    pub stream: StreamConfig,

    /// Upload configuration
    #[serde(default)]
    pub upload: UploadConfig,

    /// Chat configuration
    #[serde(default)]
    pub chat: ChatConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Local cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries written under another version are discarded on read
    #[serde(default = "default_cache_version")]
    pub version: String,

    /// Maximum number of stored entries
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Storage quota in bytes
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: usize,

    /// TTL for autocomplete query results
    #[serde(default = "default_query_ttl_secs")]
    pub query_ttl_secs: u64,

    /// TTL for the document name -> id mapping
    #[serde(default = "default_name_map_ttl_secs")]
    pub name_map_ttl_secs: u64,
}

/// Document autocomplete configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutocompleteConfig {
    /// Maximum suggestions shown
    #[serde(default = "default_autocomplete_max_results")]
    pub max_results: usize,

    /// Debounce window for ordinary keystrokes (milliseconds, at most 100)
    #[serde(default = "default_autocomplete_debounce_ms")]
    pub debounce_ms: u64,
}

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Delay before the fallback save timer fires (milliseconds)
    #[serde(default = "default_fallback_save_ms")]
    pub fallback_save_ms: u64,
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Status poll interval (milliseconds)
    #[serde(default = "default_upload_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Poll attempts before giving up
    #[serde(default = "default_upload_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Maximum file size in bytes
    #[serde(default = "default_upload_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Accepted file extensions (lowercase, no dot)
    #[serde(default = "default_upload_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

/// Chat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Maximum chat title length in characters
    #[serde(default = "default_chat_max_title_chars")]
    pub max_title_chars: usize,

    /// Greeting used for new chats and as the load-failure fallback
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for kbchat data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the SQLite cache database
    pub cache_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ml_server_url: default_ml_server_url(),
            user_id: default_user_id(),
            request_timeout_secs: default_request_timeout(),
            cache: CacheConfig::default(),
            autocomplete: AutocompleteConfig::default(),
            stream: StreamConfig::default(),
            upload: UploadConfig::default(),
            chat: ChatConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: default_cache_version(),
            max_entries: default_cache_max_entries(),
            max_bytes: default_cache_max_bytes(),
            query_ttl_secs: default_query_ttl_secs(),
            name_map_ttl_secs: default_name_map_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.query_ttl_secs)
    }

    pub fn name_map_ttl(&self) -> Duration {
        Duration::from_secs(self.name_map_ttl_secs)
    }
}

impl Default for AutocompleteConfig {
    fn default() -> Self {
        Self {
            max_results: default_autocomplete_max_results(),
            debounce_ms: default_autocomplete_debounce_ms(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fallback_save_ms: default_fallback_save_ms(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_upload_poll_interval_ms(),
            max_poll_attempts: default_upload_max_poll_attempts(),
            max_file_bytes: default_upload_max_file_bytes(),
            allowed_extensions: default_upload_allowed_extensions(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_title_chars: default_chat_max_title_chars(),
            welcome_message: default_welcome_message(),
        }
    }
}

impl Config {
    /// Get the default base directory for kbchat (~/.kbchat)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kbchat")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub(crate) fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            cache_file: base.join("cache.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            cache_file: base.join("cache.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured user, or a configuration error when none is set
    pub fn require_user(&self) -> Result<&str> {
        if self.user_id.trim().is_empty() {
            return Err(Error::Config(
                "user_id is not set (config file or KBCHAT_USER_ID)".to_string(),
            ));
        }
        Ok(&self.user_id)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api_url)
            .map_err(|e| Error::Config(format!("api_url is not a valid URL: {}", e)))?;
        url::Url::parse(&self.ml_server_url)
            .map_err(|e| Error::Config(format!("ml_server_url is not a valid URL: {}", e)))?;

        if self.cache.max_entries == 0 {
            return Err(Error::Config(
                "cache.max_entries must be positive".to_string(),
            ));
        }

        if self.cache.max_bytes == 0 {
            return Err(Error::Config("cache.max_bytes must be positive".to_string()));
        }

        if self.autocomplete.max_results == 0 {
            return Err(Error::Config(
                "autocomplete.max_results must be positive".to_string(),
            ));
        }

        if self.autocomplete.debounce_ms > 100 {
            return Err(Error::Config(
                "autocomplete.debounce_ms must be at most 100".to_string(),
            ));
        }

        if self.upload.poll_interval_ms == 0 || self.upload.max_poll_attempts == 0 {
            return Err(Error::Config(
                "upload.poll_interval_ms and upload.max_poll_attempts must be positive"
                    .to_string(),
            ));
        }

        if self.chat.max_title_chars == 0 {
            return Err(Error::Config(
                "chat.max_title_chars must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.autocomplete.max_results, 20);
        assert_eq!(config.cache.query_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.name_map_ttl(), Duration::from_secs(600));
        assert_eq!(config.stream.fallback_save_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.user_id = "user-42".to_string();
        config.autocomplete.max_results = 7;

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.user_id, "user-42");
        assert_eq!(loaded.autocomplete.max_results, 7);
        assert_eq!(loaded.paths.cache_file, tmp.path().join("cache.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "user_id = \"u1\"\n[upload]\npoll_interval_ms = 50\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.user_id, "u1");
        assert_eq!(config.upload.poll_interval_ms, 50);
        assert_eq!(config.upload.max_poll_attempts, 150);
        assert_eq!(config.cache.version, "1");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.autocomplete.debounce_ms = 250;
        assert!(config.validate().is_err());

        config.autocomplete.debounce_ms = 80;
        assert!(config.validate().is_ok());

        config.api_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_require_user() {
        let mut config = Config::default();
        config.user_id = "  ".to_string();
        assert!(config.require_user().is_err());

        config.user_id = "abc".to_string();
        assert_eq!(config.require_user().unwrap(), "abc");
    }
}

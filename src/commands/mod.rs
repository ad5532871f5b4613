//! CLI commands implementation

pub mod ask;
pub mod cache;
pub mod chats;
pub mod compose;
pub mod docs;
pub mod init;

pub use ask::*;
pub use cache::*;
pub use chats::*;
pub use compose::*;
pub use docs::*;
pub use init::*;

use crate::cache::LocalCache;
use crate::config::Config;
use std::sync::Arc;
use tracing::warn;

/// Open the local cache; commands keep working without it
pub async fn open_cache(config: &Config) -> Option<Arc<LocalCache>> {
    match LocalCache::open(&config.paths.cache_file, &config.cache).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!("Local cache unavailable, continuing without it: {}", e);
            None
        }
    }
}

/// Shorten `text` to `max` characters for one-line display
pub(crate) fn preview(text: &str, max: usize) -> String {
    let flat = text.trim().replace('\n', " ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut.trim_end())
    } else {
        flat
    }
}

//! Local cache maintenance commands

use crate::cache::{CacheStats, LocalCache};
use crate::config::Config;
use crate::error::Result;
use tracing::info;

/// Drop expired entries, then report usage
pub async fn cmd_cache_stats(config: &Config) -> Result<CacheStats> {
    let cache = LocalCache::open(&config.paths.cache_file, &config.cache).await?;
    let purged = cache.purge_expired().await?;
    if purged > 0 {
        info!("Purged {} expired cache entries", purged);
    }
    cache.stats().await
}

/// Remove every cache entry; returns how many were removed
pub async fn cmd_cache_clear(config: &Config) -> Result<u64> {
    let cache = LocalCache::open(&config.paths.cache_file, &config.cache).await?;
    cache.clear().await
}

pub fn print_cache_stats(config: &Config, stats: &CacheStats) {
    println!("\n🗄  kbchat Cache\n");
    println!("Location: {}", config.paths.cache_file.display());
    println!("Version: {}", stats.version);
    println!("Entries: {} / {}", stats.entries, stats.max_entries);
    println!(
        "Size: {} / {} bytes ({:.1}%)",
        stats.bytes,
        stats.max_bytes,
        if stats.max_bytes == 0 {
            0.0
        } else {
            stats.bytes as f64 * 100.0 / stats.max_bytes as f64
        }
    );
}

//! Local key-value cache with TTL and version based expiry
//!
//! Entries are JSON values stored in a small SQLite database:
//! - `get` drops entries whose version differs from the configured one or
//!   whose TTL has elapsed
//! - `set` enforces the entry-count and byte quota by purging the oldest
//!   entries first

mod schema;

pub use schema::*;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A cached value with the metadata used to judge its freshness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Milliseconds since the Unix epoch when the entry was written
    pub timestamp: i64,
    pub version: String,
}

#[derive(Debug, Clone, FromRow)]
struct CacheRow {
    data: String,
    timestamp: i64,
    version: String,
    ttl_ms: i64,
}

#[derive(Debug, Clone, FromRow)]
struct EvictionCandidate {
    key: String,
    size: i64,
}

/// Cache usage figures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
    pub version: String,
}

/// Persistent local cache
pub struct LocalCache {
    pool: SqlitePool,
    version: String,
    max_entries: usize,
    max_bytes: usize,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl LocalCache {
    /// Open (or create) the cache database at `path`
    pub async fn open(path: &Path, config: &CacheConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Opening cache database at {:?}", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, config).await
    }

    /// Cache that lives only as long as the process
    pub async fn in_memory(config: &CacheConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single connection keeps every query on the same in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, config).await
    }

    async fn with_pool(pool: SqlitePool, config: &CacheConfig) -> Result<Self> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self {
            pool,
            version: config.version.clone(),
            max_entries: config.max_entries,
            max_bytes: config.max_bytes,
        })
    }

    /// Store `value` under `key` for `ttl`
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let data = serde_json::to_string(value)?;
        let size = data.len();

        if size > self.max_bytes {
            return Err(Error::Cache(format!(
                "Value for '{}' ({} bytes) exceeds the cache quota of {} bytes",
                key, size, self.max_bytes
            )));
        }

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, data, timestamp, version, ttl_ms, size)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                timestamp = excluded.timestamp,
                version = excluded.version,
                ttl_ms = excluded.ttl_ms,
                size = excluded.size
            "#,
        )
        .bind(key)
        .bind(&data)
        .bind(now_millis())
        .bind(&self.version)
        .bind(ttl_ms)
        .bind(size as i64)
        .execute(&self.pool)
        .await?;

        trace!("Cached '{}' ({} bytes, ttl {:?})", key, size, ttl);

        let evicted = self.enforce_limits(key).await?;
        if evicted > 0 {
            debug!("Evicted {} cache entries to stay within quota", evicted);
        }
        Ok(())
    }

    /// Fetch a fresh value, or `None` when missing, expired or stale
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.get_entry(key).await?.map(|entry| entry.data))
    }

    /// Fetch a fresh entry together with its metadata
    pub async fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT data, timestamp, version, ttl_ms FROM cache_entries WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        if row.version != self.version {
            debug!(
                "Cache entry '{}' has version {} (want {}), evicting",
                key, row.version, self.version
            );
            self.remove(key).await?;
            return Ok(None);
        }

        if now_millis() - row.timestamp > row.ttl_ms {
            trace!("Cache entry '{}' expired", key);
            self.remove(key).await?;
            return Ok(None);
        }

        match serde_json::from_str(&row.data) {
            Ok(data) => Ok(Some(CacheEntry {
                data,
                timestamp: row.timestamp,
                version: row.version,
            })),
            Err(e) => {
                warn!("Discarding unreadable cache entry '{}': {}", key, e);
                self.remove(key).await?;
                Ok(None)
            }
        }
    }

    /// Remove a single entry; returns whether it existed
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every entry whose key starts with `prefix`
    pub async fn remove_prefix(&self, prefix: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1")
                .bind(prefix)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Remove everything
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drop expired and wrong-version entries
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE version != ? OR (? - timestamp) > ttl_ms",
        )
        .bind(&self.version)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let (entries, bytes) = self.usage().await?;
        Ok(CacheStats {
            entries,
            bytes,
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
            version: self.version.clone(),
        })
    }

    async fn usage(&self) -> Result<(usize, usize)> {
        let (count, bytes): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM cache_entries")
                .fetch_one(&self.pool)
                .await?;
        Ok((count.max(0) as usize, bytes.max(0) as usize))
    }

    /// Purge oldest entries (never `keep`) until both limits hold
    async fn enforce_limits(&self, keep: &str) -> Result<u64> {
        let (mut count, mut bytes) = self.usage().await?;
        if count <= self.max_entries && bytes <= self.max_bytes {
            return Ok(0);
        }

        let candidates = sqlx::query_as::<_, EvictionCandidate>(
            "SELECT key, size FROM cache_entries WHERE key != ? ORDER BY timestamp ASC, key ASC",
        )
        .bind(keep)
        .fetch_all(&self.pool)
        .await?;

        let mut evicted = 0;
        for candidate in candidates {
            if count <= self.max_entries && bytes <= self.max_bytes {
                break;
            }
            if self.remove(&candidate.key).await? {
                count -= 1;
                bytes = bytes.saturating_sub(candidate.size.max(0) as usize);
                evicted += 1;
            }
        }

        Ok(evicted)
    }
}

//! SQLite schema for the local cache

/// SQL schema for the cache database
pub const SCHEMA_SQL: &str = r#"
-- One row per cached value; data is JSON
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    version TEXT NOT NULL,
    ttl_ms INTEGER NOT NULL,
    size INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_timestamp ON cache_entries(timestamp);
"#;

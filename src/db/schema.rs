/// Schema for the durable collections. Timestamps are Unix milliseconds.
pub const SCHEMA: &str = r#"
-- Read cache: one row per key, last write wins
CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache(expires_at);

-- Pending writes, replayed in timestamp order
CREATE TABLE IF NOT EXISTS mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    data BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    -- Replayer currently holding the row, and since when
    claimed_by TEXT,
    claimed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_mutations_timestamp ON mutations(timestamp);
CREATE INDEX IF NOT EXISTS idx_mutations_type ON mutations(type);
"#;

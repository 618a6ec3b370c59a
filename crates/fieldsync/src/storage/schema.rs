//! `SQLite` schema definitions for fieldsync.
//!
//! Everything durable lives in one key/value table. Cache entries, the
//! pending queue and sync bookkeeping are told apart by key prefix.

/// SQL statement to create the key/value table.
pub const CREATE_KV_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[CREATE_KV_TABLE, CREATE_METADATA_TABLE];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_kv_table_columns() {
        assert!(CREATE_KV_TABLE.contains("key TEXT PRIMARY KEY"));
        assert!(CREATE_KV_TABLE.contains("value TEXT NOT NULL"));
        assert!(CREATE_KV_TABLE.contains("updated_at TEXT NOT NULL"));
    }
}

//! SQL DDL for the conversation store.
//!
//! Defines the `chat_memory` table (one row per conversation key holding the
//! whole encoded history) and `schema_meta`. All DDL uses `IF NOT EXISTS` for
//! idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- One row per conversation context; `messages` is an opaque encoded payload
CREATE TABLE IF NOT EXISTS chat_memory (
    memory_key TEXT PRIMARY KEY,
    messages TEXT NOT NULL,
    last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"chat_memory".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn last_updated_defaults_to_now() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO chat_memory (memory_key, messages) VALUES ('1:dm', '[]')",
            [],
        )
        .unwrap();
        let ts: Option<String> = conn
            .query_row(
                "SELECT last_updated FROM chat_memory WHERE memory_key = '1:dm'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(ts.is_some());
    }
}

//! Persistence backend: one SQLite connection behind its own lock.
//!
//! Every write replaces a key's whole history with `INSERT OR REPLACE`, so a
//! row is never partially updated. Batches run in a single transaction and
//! either land completely or not at all.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{MemoryError, Result};
use crate::memory::codec::{CipherCodec, Decoded};
use crate::memory::key::ContextKey;
use crate::memory::types::Message;

/// A stored conversation row, without its payload.
#[derive(Debug, Clone, Serialize)]
pub struct StoredKey {
    pub key: String,
    pub last_updated: Option<String>,
    /// Length of the encoded payload in bytes.
    pub payload_bytes: usize,
}

impl StoredKey {
    /// `last_updated` as UTC. SQLite's `CURRENT_TIMESTAMP` is
    /// `YYYY-MM-DD HH:MM:SS` in UTC.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.last_updated.as_deref()?;
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Row counts and schema info for the `stats` command.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    pub conversations: u64,
    pub dm_conversations: u64,
    pub group_conversations: u64,
    pub schema_version: u32,
    pub rows_written: u64,
}

pub struct PersistenceBackend {
    conn: Mutex<Option<Connection>>,
    codec: CipherCodec,
    rows_written: AtomicU64,
}

impl PersistenceBackend {
    /// Open (or create) the database file and wrap it.
    pub fn open(path: impl AsRef<Path>, codec: CipherCodec) -> anyhow::Result<Self> {
        let conn = crate::db::open_database(path)?;
        Ok(Self::from_connection(conn, codec))
    }

    /// Wrap a connection whose schema is already initialized.
    pub fn from_connection(conn: Connection, codec: CipherCodec) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            codec,
            rows_written: AtomicU64::new(0),
        }
    }

    pub fn codec(&self) -> &CipherCodec {
        &self.codec
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|_| MemoryError::Poisoned)
    }

    /// Fetch and decode one key's history. `Ok(None)` if the key was never stored.
    pub fn load(&self, key: &ContextKey) -> Result<Option<Decoded>> {
        let stored: Option<String> = {
            let guard = self.lock()?;
            let conn = guard.as_ref().ok_or(MemoryError::Closed)?;
            conn.query_row(
                "SELECT messages FROM chat_memory WHERE memory_key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?
        };

        stored
            .map(|payload| self.codec.decode_history(&payload))
            .transpose()
    }

    /// Whether a row exists for `key`, without decoding it.
    pub fn contains(&self, key: &ContextKey) -> Result<bool> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(MemoryError::Closed)?;
        let found = conn
            .query_row(
                "SELECT 1 FROM chat_memory WHERE memory_key = ?1",
                params![key.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Encrypt and upsert every entry in one transaction. On any failure the
    /// transaction is rolled back and nothing is written.
    pub fn store_batch(&self, entries: &[(ContextKey, Vec<Message>)]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(MemoryError::Closed)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO chat_memory (memory_key, messages, last_updated) \
                 VALUES (?1, ?2, CURRENT_TIMESTAMP)",
            )?;
            for (key, messages) in entries {
                let payload = self.codec.encode_history(messages)?;
                stmt.execute(params![key.as_str(), payload])?;
            }
        }
        // Dropping `tx` on an early return above rolls it back.
        tx.commit()?;

        self.rows_written
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        Ok(entries.len())
    }

    /// Remove a key's row. Returns `true` if a row existed.
    pub fn delete(&self, key: &ContextKey) -> Result<bool> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(MemoryError::Closed)?;
        let removed = conn.execute(
            "DELETE FROM chat_memory WHERE memory_key = ?1",
            params![key.as_str()],
        )?;
        Ok(removed > 0)
    }

    /// All stored keys, most recently updated first.
    pub fn list_keys(&self) -> Result<Vec<StoredKey>> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(MemoryError::Closed)?;
        let mut stmt = conn.prepare(
            "SELECT memory_key, last_updated, length(messages) FROM chat_memory \
             ORDER BY last_updated DESC, memory_key",
        )?;
        let keys = stmt
            .query_map([], |row| {
                Ok(StoredKey {
                    key: row.get(0)?,
                    last_updated: row.get(1)?,
                    payload_bytes: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    pub fn stats(&self) -> Result<BackendStats> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(MemoryError::Closed)?;
        let (conversations, group_conversations): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(memory_key LIKE 'group:%'), 0) FROM chat_memory",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let schema_version = crate::db::migrations::get_schema_version(conn)?;

        Ok(BackendStats {
            conversations: conversations as u64,
            dm_conversations: (conversations - group_conversations) as u64,
            group_conversations: group_conversations as u64,
            schema_version,
            rows_written: self.rows_written(),
        })
    }

    /// Rows upserted by this instance since it was opened.
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    /// Close the connection. Idempotent; later operations fail with
    /// [`MemoryError::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| MemoryError::Persistence(e))?;
            tracing::info!("database connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> PersistenceBackend {
        let conn = crate::db::open_memory_database().unwrap();
        PersistenceBackend::from_connection(conn, CipherCodec::new([1u8; 32]))
    }

    fn raw_payload(backend: &PersistenceBackend, key: &str) -> String {
        let guard = backend.lock().unwrap();
        guard
            .as_ref()
            .unwrap()
            .query_row(
                "SELECT messages FROM chat_memory WHERE memory_key = ?1",
                [key],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn missing_key_loads_as_none() {
        let backend = backend();
        assert!(backend.load(&ContextKey::dm("1")).unwrap().is_none());
    }

    #[test]
    fn stored_rows_are_encrypted_at_rest() {
        let backend = backend();
        let key = ContextKey::dm("1");
        backend
            .store_batch(&[(key.clone(), vec![Message::user("secret plans")])])
            .unwrap();

        let raw = raw_payload(&backend, "1:dm");
        assert!(raw.starts_with("enc:v1:"));
        assert!(!raw.contains("secret plans"));

        let loaded = backend.load(&key).unwrap().unwrap();
        assert_eq!(loaded, Decoded::Encrypted(vec![Message::user("secret plans")]));
    }

    #[test]
    fn upsert_replaces_whole_history() {
        let backend = backend();
        let key = ContextKey::group("9");
        backend
            .store_batch(&[(key.clone(), vec![Message::user("a"), Message::user("b")])])
            .unwrap();
        backend
            .store_batch(&[(key.clone(), vec![Message::assistant("c")])])
            .unwrap();

        let loaded = backend.load(&key).unwrap().unwrap().into_messages();
        assert_eq!(loaded, vec![Message::assistant("c")]);
        assert_eq!(backend.rows_written(), 2);

        let keys = backend.list_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key, "group:9");
        let age = Utc::now() - keys[0].updated_at().unwrap();
        assert!(age.num_minutes().abs() < 5);
    }

    #[test]
    fn stats_split_namespaces() {
        let backend = backend();
        backend
            .store_batch(&[
                (ContextKey::dm("1"), vec![]),
                (ContextKey::dm("2"), vec![]),
                (ContextKey::group("3"), vec![]),
            ])
            .unwrap();

        let stats = backend.stats().unwrap();
        assert_eq!(stats.conversations, 3);
        assert_eq!(stats.dm_conversations, 2);
        assert_eq!(stats.group_conversations, 1);
        assert_eq!(stats.schema_version, crate::db::migrations::CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn delete_removes_row() {
        let backend = backend();
        let key = ContextKey::dm("5");
        backend.store_batch(&[(key.clone(), vec![Message::user("x")])]).unwrap();
        assert!(backend.contains(&key).unwrap());
        assert!(backend.delete(&key).unwrap());
        assert!(!backend.delete(&key).unwrap());
        assert!(!backend.contains(&key).unwrap());
        assert!(backend.load(&key).unwrap().is_none());
    }

    #[test]
    fn closed_backend_rejects_operations() {
        let backend = backend();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(backend.is_closed());
        assert!(matches!(
            backend.load(&ContextKey::dm("1")),
            Err(MemoryError::Closed)
        ));
        assert!(matches!(
            backend.store_batch(&[(ContextKey::dm("1"), vec![])]),
            Err(MemoryError::Closed)
        ));
    }
}

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use chatvault::memory::backend::PersistenceBackend;
use chatvault::memory::codec::CipherCodec;
use chatvault::memory::CacheStore;
use rusqlite::Connection;
use tempfile::TempDir;

pub const TEST_KEY: &str = "J5TPb34dRRw2z-YA_40rtyaZ9jfLxMeGqdq14MF5Ypg=";

pub fn codec() -> CipherCodec {
    CipherCodec::from_base64_key(TEST_KEY).unwrap()
}

/// Path of the on-disk database inside a temp dir.
pub fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("state").join("bot_memory.db")
}

/// Open a store over the database at `path` with the shared test key.
pub fn open_store(path: &Path, retention_limit: usize) -> CacheStore {
    open_store_with(path, retention_limit, codec())
}

pub fn open_store_with(path: &Path, retention_limit: usize, codec: CipherCodec) -> CacheStore {
    let backend = PersistenceBackend::open(path, codec).unwrap();
    CacheStore::new(backend, retention_limit)
}

/// A second, raw connection to the same database file (WAL allows it).
pub fn raw_connection(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.busy_timeout(std::time::Duration::from_millis(5000))
        .unwrap();
    conn
}

/// Make every insert of `key` fail, simulating a write failure mid-commit.
pub fn fail_writes_for(path: &Path, key: &str) {
    raw_connection(path)
        .execute_batch(&format!(
            "CREATE TRIGGER fail_{tag} BEFORE INSERT ON chat_memory \
             WHEN NEW.memory_key = '{key}' \
             BEGIN SELECT RAISE(ABORT, 'simulated write failure'); END;",
            tag = trigger_tag(key),
        ))
        .unwrap();
}

pub fn allow_writes_for(path: &Path, key: &str) {
    raw_connection(path)
        .execute_batch(&format!("DROP TRIGGER fail_{};", trigger_tag(key)))
        .unwrap();
}

fn trigger_tag(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

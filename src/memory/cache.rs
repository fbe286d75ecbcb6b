//! Write-back conversation cache.
//!
//! [`CacheStore`] keeps every loaded history in memory and tracks which keys
//! have unflushed changes. Reads return owned snapshots; callers stage
//! changes with [`CacheStore::set`] and persist them with
//! [`CacheStore::commit`].
//!
//! Two locks guard the store: the cache lock (map + dirty set) and the
//! backend's connection lock. The cache lock is always released before the
//! connection lock is taken, so a slow encrypted write never blocks
//! concurrent `get`/`set` calls. Commits are serialized by a third lock held
//! from snapshot to write, so an older snapshot can never land after a newer
//! one.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::memory::backend::PersistenceBackend;
use crate::memory::codec::Decoded;
use crate::memory::key::ContextKey;
use crate::memory::types::{ChatKind, Message};

#[derive(Default)]
struct CacheState {
    entries: HashMap<ContextKey, Vec<Message>>,
    dirty: BTreeSet<ContextKey>,
}

pub struct CacheStore {
    state: Mutex<CacheState>,
    commit_lock: Mutex<()>,
    backend: PersistenceBackend,
    retention_limit: usize,
}

impl CacheStore {
    pub fn new(backend: PersistenceBackend, retention_limit: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            commit_lock: Mutex::new(()),
            backend,
            retention_limit: retention_limit.max(1),
        }
    }

    pub fn backend(&self) -> &PersistenceBackend {
        &self.backend
    }

    pub fn retention_limit(&self) -> usize {
        self.retention_limit
    }

    // Map and dirty set stay consistent under every operation, so a poisoned
    // lock is still safe to use.
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the oldest messages beyond the retention limit.
    fn retain_recent(&self, messages: &mut Vec<Message>) {
        if messages.len() > self.retention_limit {
            let excess = messages.len() - self.retention_limit;
            messages.drain(..excess);
        }
    }

    /// History for a conversation context. Empty if none is stored or it
    /// cannot be loaded.
    pub fn get(&self, subject_id: Option<&str>, chat_id: Option<&str>, kind: &ChatKind) -> Vec<Message> {
        self.load(&ContextKey::resolve(subject_id, chat_id, kind))
    }

    /// Like [`get`](Self::get), returning `default` when the history is empty.
    pub fn get_or(
        &self,
        subject_id: Option<&str>,
        chat_id: Option<&str>,
        kind: &ChatKind,
        default: Vec<Message>,
    ) -> Vec<Message> {
        let messages = self.get(subject_id, chat_id, kind);
        if messages.is_empty() {
            default
        } else {
            messages
        }
    }

    /// History for an already-resolved key, degrading to empty on failure.
    pub fn load(&self, key: &ContextKey) -> Vec<Message> {
        match self.try_load(key) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "failed to load conversation history");
                Vec::new()
            }
        }
    }

    /// History for a key, surfacing backend and strict-policy decode failures.
    /// Nothing is cached when loading fails.
    pub fn try_load(&self, key: &ContextKey) -> Result<Vec<Message>> {
        if let Some(messages) = self.state().entries.get(key) {
            return Ok(messages.clone());
        }

        // Loaded outside the cache lock; if another thread populated or set
        // the key meanwhile, its value wins.
        let mut messages = match self.backend.load(key)? {
            None => Vec::new(),
            Some(Decoded::Encrypted(messages)) => messages,
            Some(Decoded::Plaintext(messages)) => {
                tracing::info!(key = %key, "loaded pre-encryption history as plain JSON");
                messages
            }
            Some(Decoded::Lost) => {
                tracing::warn!(key = %key, "stored history is unreadable with the current key, starting empty");
                Vec::new()
            }
        };
        // Rows written under a larger limit, or before encryption, may be longer.
        self.retain_recent(&mut messages);

        let mut state = self.state();
        Ok(state.entries.entry(key.clone()).or_insert(messages).clone())
    }

    /// Replace a key's history and mark it dirty. Histories longer than the
    /// retention limit keep only their most recent messages. No I/O.
    pub fn set(&self, key: &ContextKey, mut messages: Vec<Message>) {
        self.retain_recent(&mut messages);

        let mut state = self.state();
        state.entries.insert(key.clone(), messages);
        state.dirty.insert(key.clone());
    }

    pub fn set_for(
        &self,
        subject_id: Option<&str>,
        chat_id: Option<&str>,
        kind: &ChatKind,
        messages: Vec<Message>,
    ) {
        self.set(&ContextKey::resolve(subject_id, chat_id, kind), messages);
    }

    /// Append to a key's history and return the stored result.
    ///
    /// Load, extend, and set are separate steps, so two threads appending to
    /// the same key concurrently resolve as last-write-wins.
    pub fn append(&self, key: &ContextKey, new_messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
        let mut messages = self.load(key);
        messages.extend(new_messages);
        self.set(key, messages);
        self.peek(key).unwrap_or_default()
    }

    /// Cached value without loading from the backend.
    pub fn peek(&self, key: &ContextKey) -> Option<Vec<Message>> {
        self.state().entries.get(key).cloned()
    }

    /// Persist every dirty key in one transaction. Returns `true` only if the
    /// transaction committed; on failure the keys stay dirty for the next try.
    pub fn commit(&self) -> bool {
        // Held through the write: a commit that snapshots later also writes later.
        let _serial = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot: Vec<(ContextKey, Vec<Message>)> = {
            let mut state = self.state();
            if state.dirty.is_empty() {
                return true;
            }
            let dirty = std::mem::take(&mut state.dirty);
            dirty
                .into_iter()
                .filter_map(|key| {
                    let messages = state.entries.get(&key).cloned()?;
                    Some((key, messages))
                })
                .collect()
        };

        match self.backend.store_batch(&snapshot) {
            Ok(written) => {
                tracing::debug!(count = written, "committed dirty conversations");
                true
            }
            Err(e) => {
                tracing::error!(count = snapshot.len(), error = %e, "memory commit failed, keys stay dirty");
                let mut state = self.state();
                state.dirty.extend(snapshot.into_iter().map(|(key, _)| key));
                false
            }
        }
    }

    /// Administrative delete: drops the key from the cache, the dirty set,
    /// and the store.
    pub fn forget(&self, key: &ContextKey) -> Result<bool> {
        let cached = {
            let mut state = self.state();
            state.dirty.remove(key);
            state.entries.remove(key).is_some()
        };
        let stored = self.backend.delete(key)?;
        tracing::info!(key = %key, stored, "forgot conversation");
        Ok(cached || stored)
    }

    pub fn dirty_keys(&self) -> Vec<ContextKey> {
        self.state().dirty.iter().cloned().collect()
    }

    pub fn is_dirty(&self, key: &ContextKey) -> bool {
        self.state().dirty.contains(key)
    }

    pub fn cached_len(&self) -> usize {
        self.state().entries.len()
    }

    /// Final commit followed by closing the connection.
    pub fn shutdown(&self) -> bool {
        let committed = self.commit();
        if !committed {
            tracing::error!(pending = self.dirty_keys().len(), "final commit failed, unflushed changes are lost");
        }
        if let Err(e) = self.backend.close() {
            tracing::error!(error = %e, "failed to close database connection");
        }
        committed
    }
}

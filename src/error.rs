//! Error taxonomy for the memory subsystem.
//!
//! Library code returns [`MemoryError`]; the CLI and startup paths wrap it in
//! `anyhow` with context. Storage failures are converted to `false` or empty
//! results at the [`CacheStore`](crate::memory::cache::CacheStore) boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// A stored payload could not be decrypted (wrong key or corruption).
    #[error("failed to decrypt stored history: {0}")]
    Decrypt(String),

    #[error("failed to encrypt history: {0}")]
    Encrypt(String),

    /// The embedded store was unreachable, locked, or rejected a write.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// The persistence connection has already been closed.
    #[error("persistence connection is closed")]
    Closed,

    #[error("persistence lock poisoned by a panicked writer")]
    Poisoned,

    /// The legacy flat file was malformed or could not be imported.
    #[error("legacy migration failed: {0}")]
    Migration(String),

    /// A required secret or setting is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = MemoryError> = std::result::Result<T, E>;

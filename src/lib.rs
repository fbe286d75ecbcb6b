//! Encrypted, context-scoped conversation memory for chat bots.
//!
//! chatvault is a write-back cache over SQLite. Each conversation context
//! (one per private chat partner, one per group) keeps an ordered message
//! history that handler threads read as snapshots, stage with `set`, and
//! persist with `commit`. Histories are encrypted at rest.
//!
//! | Context | Key | Shared by |
//! |---------|-----|-----------|
//! | Private chat | `<subject>:dm` | One person |
//! | Group / supergroup / channel | `group:<chat>` | Every participant |
//!
//! # Architecture
//!
//! - **Storage**: one SQLite table in WAL mode, written with whole-history upserts
//! - **Encryption**: ChaCha20-Poly1305 with a static key, plaintext fallback for old rows
//! - **Durability**: dirty keys flushed every interval and once more at shutdown
//! - **Migration**: a legacy compressed-JSON file is imported once at startup
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite database initialization, schema, and migrations
//! - [`error`]: The [`MemoryError`](error::MemoryError) taxonomy
//! - [`memory`]: Key resolution, cache, codec, backend, legacy import, and flushing

pub mod config;
pub mod db;
pub mod error;
pub mod memory;

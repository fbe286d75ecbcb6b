//! One-shot import of the legacy flat-file memory.
//!
//! The legacy file holds a JSON object mapping subject id to a message list,
//! zlib-compressed and base64-encoded. Older installs wrote the JSON directly;
//! both forms are accepted. Legacy data carried no chat kind, so every entry
//! lands in the private namespace. Subjects that already have a stored row
//! are skipped, so a repeated import never overwrites newer history.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use serde::Serialize;

use crate::error::{MemoryError, Result};
use crate::memory::cache::CacheStore;
use crate::memory::key::ContextKey;
use crate::memory::types::Message;

pub const BACKUP_SUFFIX: &str = "bak";

type LegacyMemory = BTreeMap<String, Vec<Message>>;

/// Outcome of an import run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ImportOutcome {
    /// No legacy file at the configured path.
    NotFound,
    Imported {
        conversations: usize,
        skipped: usize,
        backup: PathBuf,
    },
    /// Committed, but the file could not be renamed. A later run skips the
    /// subjects imported here.
    ImportedNotRenamed { conversations: usize, skipped: usize },
}

/// Path the legacy file is renamed to once imported: `chat_memory.json.bak`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Decode a legacy payload: base64 + zlib + JSON, or bare JSON.
pub fn decode_legacy(raw: &str) -> Result<LegacyMemory> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(LegacyMemory::new());
    }
    if raw.starts_with('{') {
        return serde_json::from_str(raw)
            .map_err(|e| MemoryError::Migration(format!("legacy JSON is malformed: {e}")));
    }

    let compressed = STANDARD
        .decode(raw)
        .map_err(|e| MemoryError::Migration(format!("legacy file is not base64: {e}")))?;
    let mut json = String::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_string(&mut json)
        .map_err(|e| MemoryError::Migration(format!("legacy file failed to inflate: {e}")))?;
    serde_json::from_str(&json)
        .map_err(|e| MemoryError::Migration(format!("legacy JSON is malformed: {e}")))
}

/// Import the legacy file at `path` into `store`, commit, and rename the file
/// so the import never repeats. If decoding or the commit fails, the file is
/// left untouched.
pub fn import_legacy_file(store: &CacheStore, path: &Path) -> Result<ImportOutcome> {
    if !path.exists() {
        return Ok(ImportOutcome::NotFound);
    }

    tracing::info!(path = %path.display(), "migrating legacy memory file");
    let raw = std::fs::read_to_string(path)?;
    let legacy = decode_legacy(&raw)?;

    let mut conversations = 0;
    let mut skipped = 0;
    for (subject_id, messages) in legacy {
        let key = ContextKey::dm(&subject_id);
        if store.backend().contains(&key)? {
            tracing::info!(key = %key, "already stored, skipping legacy history");
            skipped += 1;
            continue;
        }
        store.set(&key, messages);
        conversations += 1;
    }

    if !store.commit() {
        return Err(MemoryError::Migration(
            "commit of imported conversations failed".into(),
        ));
    }

    let backup = backup_path(path);
    if let Err(e) = std::fs::rename(path, &backup) {
        tracing::error!(
            path = %path.display(),
            backup = %backup.display(),
            error = %e,
            "legacy data committed but the file could not be renamed"
        );
        return Ok(ImportOutcome::ImportedNotRenamed {
            conversations,
            skipped,
        });
    }
    tracing::info!(conversations, skipped, backup = %backup.display(), "legacy migration complete");

    Ok(ImportOutcome::Imported {
        conversations,
        skipped,
        backup,
    })
}

/// Startup entry point: failures are logged and the file is kept for the
/// next boot.
pub fn run_startup_migration(store: &CacheStore, path: &Path) -> Option<ImportOutcome> {
    match import_legacy_file(store, path) {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "legacy migration failed, will retry on next start");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn compress(json: &str) -> String {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        STANDARD.encode(encoder.finish().unwrap())
    }

    #[test]
    fn decodes_compressed_payload() {
        let raw = compress(r#"{"7": [{"role": "user", "content": "hello"}]}"#);
        let decoded = decode_legacy(&raw).unwrap();
        assert_eq!(decoded["7"], vec![Message::user("hello")]);
    }

    #[test]
    fn decodes_bare_json_payload() {
        let decoded = decode_legacy(r#"{"8": []}"#).unwrap();
        assert!(decoded["8"].is_empty());
    }

    #[test]
    fn empty_file_is_an_empty_import() {
        assert!(decode_legacy("  \n").unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_is_a_migration_error() {
        assert!(matches!(
            decode_legacy("@@not base64@@"),
            Err(MemoryError::Migration(_))
        ));
        assert!(matches!(
            decode_legacy(&compress("[1, 2]")),
            Err(MemoryError::Migration(_))
        ));
    }

    #[test]
    fn backup_path_appends_suffix() {
        let path = Path::new("/tmp/state/chat_memory.json");
        assert_eq!(
            backup_path(path),
            PathBuf::from("/tmp/state/chat_memory.json.bak")
        );
    }
}

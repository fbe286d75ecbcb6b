//! CLI `import` command: run the legacy importer against an explicit file.

use anyhow::{Context, Result};
use std::path::Path;

use chatvault::config::VaultConfig;
use chatvault::memory::legacy::{self, ImportOutcome};

/// Import a legacy memory file. Unlike startup, failures are reported as errors.
pub fn import(config: &VaultConfig, file: &Path) -> Result<()> {
    let store = crate::server::open_store(config)?;

    let outcome = legacy::import_legacy_file(&store, file)
        .with_context(|| format!("failed to import {}", file.display()))?;
    store.shutdown();

    match outcome {
        ImportOutcome::NotFound => println!("Nothing to import: {} does not exist.", file.display()),
        ImportOutcome::Imported {
            conversations,
            skipped,
            backup,
        } => {
            println!("Import complete:");
            println!("  Conversations imported: {conversations}");
            println!("  Already stored, skipped: {skipped}");
            println!("  Legacy file moved to:   {}", backup.display());
        }
        ImportOutcome::ImportedNotRenamed {
            conversations,
            skipped,
        } => {
            println!("Import committed, but {} could not be renamed:", file.display());
            println!("  Conversations imported: {conversations}");
            println!("  Already stored, skipped: {skipped}");
        }
    }

    Ok(())
}

//! CLI `inspect` command: print the decoded history of one conversation.

use anyhow::Result;
use chatvault::config::VaultConfig;
use chatvault::memory::ContextKey;

/// Inspect a single conversation by key. A bare id is read as a private chat.
pub fn inspect(config: &VaultConfig, raw_key: &str) -> Result<()> {
    let store = crate::server::open_store(config)?;
    let key = ContextKey::parse(raw_key);

    let messages = store.try_load(&key)?;

    println!("Conversation: {key}");
    println!("{}", "=".repeat(50));
    println!("  Namespace:   {}", if key.is_group() { "group" } else { "dm" });
    println!("  Messages:    {}", messages.len());
    println!();
    println!("{}", serde_json::to_string_pretty(&messages)?);

    Ok(())
}

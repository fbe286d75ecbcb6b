use anyhow::Result;
use chatvault::config::VaultConfig;

/// Display store statistics in the terminal.
pub fn stats(config: &VaultConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let store = crate::server::open_store(config)?;
    let stats = store.backend().stats()?;

    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Conversations:       {}", stats.conversations);
    println!("  Private (dm):        {}", stats.dm_conversations);
    println!("  Group:               {}", stats.group_conversations);
    println!();
    println!("Schema version:        {}", stats.schema_version);
    println!("Retention limit:       {}", store.retention_limit());
    println!("Database:              {}", db_path.display());
    println!("Database size:         {db_size} bytes");

    Ok(())
}

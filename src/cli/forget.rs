//! CLI `forget` command: administratively delete one conversation.

use anyhow::{bail, Result};
use chatvault::config::VaultConfig;
use chatvault::memory::ContextKey;

pub fn forget(config: &VaultConfig, raw_key: &str) -> Result<()> {
    let store = crate::server::open_store(config)?;
    let key = ContextKey::parse(raw_key);

    if !store.forget(&key)? {
        bail!("no stored conversation for {key}");
    }
    store.backend().close()?;

    println!("Forgot conversation {key}.");
    Ok(())
}

//! CLI `keys` command: list stored conversation contexts.

use anyhow::Result;
use chatvault::config::VaultConfig;

/// List every stored memory key, most recently updated first.
pub fn keys(config: &VaultConfig) -> Result<()> {
    let store = crate::server::open_store(config)?;
    let keys = store.backend().list_keys()?;

    if keys.is_empty() {
        println!("No stored conversations.");
        return Ok(());
    }

    let now = chrono::Utc::now();
    println!("{:<32} {:<20} {:>10} {:>10}", "Key", "Last updated", "Age", "Bytes");
    println!("{}", "=".repeat(75));
    for k in &keys {
        let age = k
            .updated_at()
            .map(|at| format_age(now - at))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<32} {:<20} {:>10} {:>10}",
            k.key,
            k.last_updated.as_deref().unwrap_or("-"),
            age,
            k.payload_bytes
        );
    }
    println!();
    println!("{} conversation(s)", keys.len());

    Ok(())
}

fn format_age(age: chrono::TimeDelta) -> String {
    if age.num_days() > 0 {
        format!("{}d", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{}h", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{}m", age.num_minutes())
    } else {
        "now".into()
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::MemoryError;
use crate::memory::codec::{CipherCodec, DecodePolicy};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VaultConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub memory: MemoryConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub legacy_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of messages kept per conversation key.
    pub retention_limit: usize,
    pub flush_interval_secs: u64,
    pub decode_policy: DecodePolicy,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Base64-encoded 32-byte key. Required; there is no built-in default.
    pub encryption_key: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            memory: MemoryConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let dir = default_vault_dir();
        Self {
            db_path: dir
                .join("state")
                .join("bot_memory.db")
                .to_string_lossy()
                .into_owned(),
            legacy_path: dir.join("chat_memory.json").to_string_lossy().into_owned(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retention_limit: 10,
            flush_interval_secs: 60,
            decode_policy: DecodePolicy::Degrade,
        }
    }
}

/// Returns `~/.chatvault/`
pub fn default_vault_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatvault")
}

/// Returns the default config file path: `~/.chatvault/config.toml`
pub fn default_config_path() -> PathBuf {
    default_vault_dir().join("config.toml")
}

impl VaultConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            VaultConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (CHATVAULT_DB, CHATVAULT_LEGACY_FILE,
    /// CHATVAULT_LOG_LEVEL, CHATVAULT_MEMORY_LIMIT, MEMORY_ENCRYPTION_KEY).
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("CHATVAULT_DB") {
            self.storage.db_path = val;
        }
        if let Some(val) = var("CHATVAULT_LEGACY_FILE") {
            self.storage.legacy_path = val;
        }
        if let Some(val) = var("CHATVAULT_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Some(val) = var("CHATVAULT_MEMORY_LIMIT") {
            match val.parse() {
                Ok(limit) => self.memory.retention_limit = limit,
                Err(_) => tracing::warn!(value = %val, "ignoring non-numeric CHATVAULT_MEMORY_LIMIT"),
            }
        }
        if let Some(val) = var("MEMORY_ENCRYPTION_KEY") {
            self.security.encryption_key = Some(val);
        }
    }

    /// Check the settings the process cannot start without.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.memory.retention_limit == 0 {
            return Err(MemoryError::Config(
                "memory.retention_limit must be at least 1".into(),
            ));
        }
        if self.memory.flush_interval_secs == 0 {
            return Err(MemoryError::Config(
                "memory.flush_interval_secs must be at least 1".into(),
            ));
        }
        self.cipher().map(|_| ())
    }

    /// Build the codec from the configured key.
    pub fn cipher(&self) -> Result<CipherCodec, MemoryError> {
        let key = self
            .security
            .encryption_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                MemoryError::Config(
                    "MEMORY_ENCRYPTION_KEY is not set; set it or security.encryption_key".into(),
                )
            })?;
        CipherCodec::from_base64_key(key)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.memory.flush_interval_secs)
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_legacy_path(&self) -> PathBuf {
        expand_tilde(&self.storage.legacy_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY: &str = "J5TPb34dRRw2z-YA_40rtyaZ9jfLxMeGqdq14MF5Ypg=";

    #[test]
    fn default_config_is_valid_apart_from_key() {
        let config = VaultConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.memory.retention_limit, 10);
        assert_eq!(config.memory.flush_interval_secs, 60);
        assert_eq!(config.memory.decode_policy, DecodePolicy::Degrade);
        assert!(config.storage.db_path.ends_with("bot_memory.db"));
        assert!(config.storage.legacy_path.ends_with("chat_memory.json"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = format!(
            r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"

[memory]
retention_limit = 25
decode_policy = "strict"

[security]
encryption_key = "{KEY}"
"#
        );
        let config: VaultConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.memory.retention_limit, 25);
        assert_eq!(config.memory.decode_policy, DecodePolicy::Strict);
        // defaults still apply for unset fields
        assert_eq!(config.memory.flush_interval_secs, 60);
        assert!(config.storage.legacy_path.ends_with("chat_memory.json"));
        config.validate().unwrap();
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config = VaultConfig::default();
        let err = config.cipher().unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[test]
    fn zero_retention_is_rejected() {
        let mut config = VaultConfig::default();
        config.security.encryption_key = Some(KEY.into());
        config.memory.retention_limit = 0;
        assert!(matches!(config.validate(), Err(MemoryError::Config(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CHATVAULT_DB", "/tmp/override.db"),
            ("CHATVAULT_MEMORY_LIMIT", "42"),
            ("MEMORY_ENCRYPTION_KEY", KEY),
        ]);
        let mut config = VaultConfig::default();

        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.memory.retention_limit, 42);
        assert_eq!(config.security.encryption_key.as_deref(), Some(KEY));
        assert_eq!(config.server.log_level, "info");
    }

    #[test]
    fn non_numeric_memory_limit_is_ignored() {
        let mut config = VaultConfig::default();
        config.apply_overrides(|name| (name == "CHATVAULT_MEMORY_LIMIT").then(|| "lots".to_string()));
        assert_eq!(config.memory.retention_limit, 10);
    }
}

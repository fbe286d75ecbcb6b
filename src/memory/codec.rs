//! Symmetric encryption of serialized history.
//!
//! Payloads are sealed with ChaCha20-Poly1305 under a static 32-byte key and
//! stored as `enc:v1:<nonce>:<ciphertext>` (URL-safe base64, no padding). Rows
//! written before encryption existed hold plain JSON; [`CipherCodec::decode_history`]
//! falls back to parsing them directly.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use serde::Deserialize;

use crate::error::{MemoryError, Result};
use crate::memory::types::Message;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// What to do with a stored row that neither decrypts nor parses as plain JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Treat the history as empty and log the loss.
    #[default]
    Degrade,
    /// Surface a [`MemoryError::Decrypt`] to the caller.
    Strict,
}

/// How a stored payload was recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Encrypted(Vec<Message>),
    /// Pre-encryption row; re-encrypted on the next write of this key.
    Plaintext(Vec<Message>),
    /// Unrecoverable under [`DecodePolicy::Degrade`].
    Lost,
}

impl Decoded {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Self::Encrypted(messages) | Self::Plaintext(messages) => messages,
            Self::Lost => Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct CipherCodec {
    aead: ChaCha20Poly1305,
    policy: DecodePolicy,
}

impl std::fmt::Debug for CipherCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherCodec")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CipherCodec {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            aead: ChaCha20Poly1305::new(Key::from_slice(&key)),
            policy: DecodePolicy::default(),
        }
    }

    /// Build from a base64 key in either alphabet, padded or not.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim().as_bytes();
        let bytes = URL_SAFE
            .decode(encoded)
            .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
            .or_else(|_| STANDARD.decode(encoded))
            .or_else(|_| STANDARD_NO_PAD.decode(encoded))
            .map_err(|e| MemoryError::Config(format!("encryption key is not valid base64: {e}")))?;

        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            MemoryError::Config(format!(
                "encryption key must decode to {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    pub fn with_policy(mut self, policy: DecodePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> DecodePolicy {
        self.policy
    }

    /// Seal a plaintext JSON document.
    pub fn encrypt(&self, plain_json: &str) -> Result<String> {
        let nonce_source = uuid::Uuid::new_v4();
        let nonce_bytes = &nonce_source.as_bytes()[..NONCE_LEN];
        let ciphertext = self
            .aead
            .encrypt(Nonce::from_slice(nonce_bytes), plain_json.as_bytes())
            .map_err(|e| MemoryError::Encrypt(e.to_string()))?;

        Ok(format!(
            "{ENVELOPE_PREFIX}{}:{}",
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    /// Open a sealed payload. Fails on a wrong key, tampering, or a value that
    /// is not an envelope at all.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let body = stored
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| MemoryError::Decrypt("payload is not an encrypted envelope".into()))?;
        let (nonce_b64, ciphertext_b64) = body
            .split_once(':')
            .ok_or_else(|| MemoryError::Decrypt("envelope is missing its nonce".into()))?;

        let nonce = URL_SAFE_NO_PAD
            .decode(nonce_b64)
            .map_err(|e| MemoryError::Decrypt(format!("bad nonce encoding: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(MemoryError::Decrypt("nonce length is invalid".into()));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64)
            .map_err(|e| MemoryError::Decrypt(format!("bad ciphertext encoding: {e}")))?;

        let plain = self
            .aead
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| MemoryError::Decrypt("authentication failed (wrong key or corrupt row)".into()))?;
        String::from_utf8(plain).map_err(|e| MemoryError::Decrypt(format!("plaintext is not UTF-8: {e}")))
    }

    /// Serialize and seal a history.
    pub fn encode_history(&self, messages: &[Message]) -> Result<String> {
        let json = serde_json::to_string(messages)?;
        self.encrypt(&json)
    }

    /// Recover a stored history: decrypt, else parse as plain JSON, else apply
    /// the configured [`DecodePolicy`].
    pub fn decode_history(&self, stored: &str) -> Result<Decoded> {
        let decrypt_err = match self.decrypt(stored) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(messages) => return Ok(Decoded::Encrypted(messages)),
                Err(e) => MemoryError::Decrypt(format!("decrypted payload is not a history: {e}")),
            },
            Err(e) => e,
        };

        if let Ok(messages) = serde_json::from_str::<Vec<Message>>(stored) {
            return Ok(Decoded::Plaintext(messages));
        }

        match self.policy {
            DecodePolicy::Degrade => Ok(Decoded::Lost),
            DecodePolicy::Strict => Err(decrypt_err),
        }
    }
}

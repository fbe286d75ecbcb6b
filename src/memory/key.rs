//! Context key resolution.
//!
//! Private chats get one history per subject (`<subject>:dm`); every other
//! chat kind shares one history per chat (`group:<chat>`).

use std::fmt;

use super::types::ChatKind;

const DM_SUFFIX: &str = ":dm";
const GROUP_PREFIX: &str = "group:";
const ANONYMOUS: &str = "anonymous";

/// Canonical conversation key, as stored in `chat_memory.memory_key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey(String);

impl ContextKey {
    /// Derive the key for a conversation context. Never fails.
    pub fn resolve(subject_id: Option<&str>, chat_id: Option<&str>, kind: &ChatKind) -> Self {
        match chat_id {
            Some(chat) if !kind.is_private() => Self::group(chat),
            // In a private chat the chat id is the subject id.
            _ => Self::dm(subject_id.or(chat_id).unwrap_or(ANONYMOUS)),
        }
    }

    pub fn dm(subject_id: &str) -> Self {
        Self(format!("{subject_id}{DM_SUFFIX}"))
    }

    pub fn group(chat_id: &str) -> Self {
        Self(format!("{GROUP_PREFIX}{chat_id}"))
    }

    /// Accept an already-formed key. A bare id without `:` is a legacy
    /// private-chat id.
    pub fn parse(raw: &str) -> Self {
        if raw.contains(':') {
            Self(raw.to_string())
        } else {
            Self::dm(raw)
        }
    }

    pub fn is_group(&self) -> bool {
        self.0.starts_with(GROUP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextKey {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_chats_ignore_chat_id() {
        let a = ContextKey::resolve(Some("42"), None, &ChatKind::Private);
        let b = ContextKey::resolve(Some("42"), Some("999"), &ChatKind::Private);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "42:dm");
    }

    #[test]
    fn group_chats_share_one_key() {
        let group = ContextKey::resolve(None, Some("999"), &ChatKind::Group);
        assert_eq!(group.as_str(), "group:999");
        assert!(group.is_group());

        let other_member = ContextKey::resolve(Some("7"), Some("999"), &ChatKind::Supergroup);
        assert_eq!(group, other_member);

        let dm = ContextKey::resolve(Some("42"), None, &ChatKind::Private);
        assert_ne!(dm, group);
    }

    #[test]
    fn group_without_chat_id_falls_back_to_dm() {
        let key = ContextKey::resolve(Some("5"), None, &ChatKind::Group);
        assert_eq!(key.as_str(), "5:dm");
    }

    #[test]
    fn missing_subject_uses_chat_id_or_anonymous() {
        let key = ContextKey::resolve(None, Some("31"), &ChatKind::Private);
        assert_eq!(key.as_str(), "31:dm");

        let key = ContextKey::resolve(None, None, &ChatKind::Private);
        assert_eq!(key.as_str(), "anonymous:dm");
    }

    #[test]
    fn parse_accepts_formed_and_legacy_keys() {
        assert_eq!(ContextKey::parse("group:12").as_str(), "group:12");
        assert_eq!(ContextKey::parse("12:dm").as_str(), "12:dm");
        assert_eq!(ContextKey::parse("12").as_str(), "12:dm");
    }

    #[test]
    fn unknown_kinds_are_shared_contexts() {
        let key = ContextKey::resolve(Some("1"), Some("2"), &ChatKind::Other("forum".into()));
        assert_eq!(key.as_str(), "group:2");
    }
}

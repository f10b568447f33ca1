//! NIP-01: Basic protocol flow description.
//!
//! This module implements the core Nostr event structure:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Unsigned drafts handed to an external signer
//! - Tag lookups used by typed projections
//! - Kind classification (regular, replaceable, ephemeral, addressable)
//!
//! Signing and signature verification are not performed here; events are
//! expected to arrive pre-verified from the transport.

use serde::{Deserialize, Serialize};

/// A single tag: `[name, value, ...]`.
pub type Tag = Vec<String>;

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds (claimed by the sender, untrusted)
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Tag>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

impl Event {
    /// Value of the LAST tag named `name`, if any.
    ///
    /// Tags are an append log: a later tag of the same name supersedes an
    /// earlier one.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        tag_value(&self.tags, name)
    }

    /// All tags named `name`, in append order.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
    }

    /// Check whether at least one tag named `name` exists.
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags_named(name).next().is_some()
    }

    /// Turn this event back into an unsigned draft (drops id and sig).
    pub fn to_unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }
}

/// An unsigned event (before signing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Tag>,
    /// Arbitrary string content
    pub content: String,
}

/// A template for creating events (without pubkey, which comes from the signer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Tag>,
    /// Arbitrary string content
    pub content: String,
}

impl EventTemplate {
    /// Attach the author's public key to produce an unsigned draft.
    pub fn into_unsigned(self, pubkey: impl Into<String>) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: pubkey.into(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
        }
    }
}

/// Event kind classification according to NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    /// Events expected to be stored by relays
    Regular,
    /// Only latest event per pubkey+kind is stored
    Replaceable,
    /// Not expected to be stored by relays
    Ephemeral,
    /// Only latest event per pubkey+kind+d-tag is stored
    Addressable,
    /// Unknown classification
    Unknown,
}

// Standard event kinds
pub const KIND_ENCRYPTED_DIRECT_MESSAGE: u16 = 4;
pub const KIND_ZAP: u16 = 9735;

/// Value of the last tag named `name` in a tag list.
pub fn tag_value<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
    tags.iter()
        .rev()
        .find(|tag| tag.first().map(String::as_str) == Some(name))
        .and_then(|tag| tag.get(1))
        .map(String::as_str)
}

/// Remove every tag named `name`, then append exactly one `[name, value]`.
///
/// Leaves at most one tag of that name in the list.
pub fn replace_tag(tags: &mut Vec<Tag>, name: &str, value: impl Into<String>) {
    tags.retain(|tag| tag.first().map(String::as_str) != Some(name));
    tags.push(vec![name.to_string(), value.into()]);
}

/// Check that `key` is a 64-char lowercase hex string.
pub fn is_hex_key(key: &str) -> bool {
    key.len() == 64 && key.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Classify an event kind according to NIP-01 rules.
pub fn classify_kind(kind: u16) -> KindClassification {
    let k = kind as u32;

    // Regular: 1000 <= n < 10000 || 4 <= n < 45 || n == 1 || n == 2
    if (1000..10000).contains(&k) || (4..45).contains(&k) || k == 1 || k == 2 {
        return KindClassification::Regular;
    }

    // Replaceable: 10000 <= n < 20000 || n == 0 || n == 3
    if (10000..20000).contains(&k) || k == 0 || k == 3 {
        return KindClassification::Replaceable;
    }

    // Ephemeral: 20000 <= n < 30000
    if (20000..30000).contains(&k) {
        return KindClassification::Ephemeral;
    }

    // Addressable: 30000 <= n < 40000
    if (30000..40000).contains(&k) {
        return KindClassification::Addressable;
    }

    KindClassification::Unknown
}

/// Check if a kind is regular.
pub fn is_regular_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Regular)
}

/// Check if a kind is replaceable.
pub fn is_replaceable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Replaceable)
}

/// Check if a kind is ephemeral.
pub fn is_ephemeral_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Ephemeral)
}

/// Check if a kind is addressable.
pub fn is_addressable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Addressable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_tags(tags: Vec<Tag>) -> Event {
        Event {
            id: "id".to_string(),
            pubkey: "a".repeat(64),
            created_at: 1_700_000_000,
            kind: 1,
            tags,
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    fn tag(name: &str, value: &str) -> Tag {
        vec![name.to_string(), value.to_string()]
    }

    #[test]
    fn test_tag_value_returns_last_match() {
        let event = event_with_tags(vec![
            tag("status", "0"),
            tag("title", "help"),
            tag("status", "2"),
        ]);

        assert_eq!(event.tag_value("status"), Some("2"));
        assert_eq!(event.tag_value("title"), Some("help"));
        assert_eq!(event.tag_value("missing"), None);
    }

    #[test]
    fn test_tag_value_ignores_nameless_tags() {
        let event = event_with_tags(vec![vec![], vec!["status".to_string()]]);
        assert_eq!(event.tag_value("status"), None);
        assert!(event.has_tag("status"));
    }

    #[test]
    fn test_replace_tag_keeps_single_entry() {
        let mut tags = vec![tag("t", "a"), tag("title", "one"), tag("title", "two")];
        replace_tag(&mut tags, "title", "three");

        let titles: Vec<_> = tags.iter().filter(|t| t[0] == "title").collect();
        assert_eq!(titles.len(), 1);
        assert_eq!(tag_value(&tags, "title"), Some("three"));
        assert_eq!(tags[0], tag("t", "a"));
    }

    #[test]
    fn test_classify_kind() {
        assert_eq!(classify_kind(1), KindClassification::Regular);
        assert_eq!(classify_kind(KIND_ENCRYPTED_DIRECT_MESSAGE), KindClassification::Regular);
        assert_eq!(classify_kind(3), KindClassification::Replaceable);
        assert_eq!(classify_kind(10002), KindClassification::Replaceable);
        assert_eq!(classify_kind(20001), KindClassification::Ephemeral);
        assert_eq!(classify_kind(32767), KindClassification::Addressable);
        assert!(is_addressable_kind(32768));
        assert!(!is_replaceable_kind(KIND_ZAP));
    }

    #[test]
    fn test_event_json_roundtrip_field_names() {
        let event = event_with_tags(vec![tag("d", "x")]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["pubkey"], "a".repeat(64));
        assert_eq!(json["created_at"], 1_700_000_000);
        assert_eq!(json["tags"][0][1], "x");
    }
}

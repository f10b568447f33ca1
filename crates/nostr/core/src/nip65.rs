//! NIP-65: Relay List Metadata
//!
//! A replaceable event (kind 10002) advertising the relays a user writes to
//! and reads mentions from. A session looks this list up after login and
//! publishes one built from its default relays when none exists.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/65.md>

use crate::nip01::{Event, EventTemplate, Tag};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event kind for relay list metadata
pub const RELAY_LIST_METADATA_KIND: u16 = 10002;

/// Tag name for relay entries
pub const RELAY_TAG: &str = "r";

/// Errors that can occur during NIP-65 operations
#[derive(Debug, Error)]
pub enum Nip65Error {
    #[error("event is not a relay list metadata event (kind {0})")]
    InvalidKind(u16),

    #[error("invalid relay URL: {0}")]
    InvalidUrl(String),
}

/// Relay marker indicating usage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMarker {
    Read,
    Write,
    /// No marker on the tag
    ReadWrite,
}

impl RelayMarker {
    fn parse(marker: Option<&str>) -> Self {
        match marker {
            Some("read") => RelayMarker::Read,
            Some("write") => RelayMarker::Write,
            _ => RelayMarker::ReadWrite,
        }
    }

    /// Tag form of the marker; `ReadWrite` is implicit.
    pub fn as_tag_value(&self) -> Option<&'static str> {
        match self {
            RelayMarker::Read => Some("read"),
            RelayMarker::Write => Some("write"),
            RelayMarker::ReadWrite => None,
        }
    }
}

/// A relay entry in the relay list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEntry {
    pub url: String,
    pub marker: RelayMarker,
}

impl RelayEntry {
    /// Build an entry, normalising the URL (trailing slash stripped).
    pub fn new(url: &str, marker: RelayMarker) -> Result<Self, Nip65Error> {
        Ok(Self {
            url: normalize_relay_url(url)?,
            marker,
        })
    }

    pub fn to_tag(&self) -> Tag {
        let mut tag = vec![RELAY_TAG.to_string(), self.url.clone()];
        if let Some(marker) = self.marker.as_tag_value() {
            tag.push(marker.to_string());
        }
        tag
    }
}

/// Relay list metadata event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayListMetadata {
    pub relays: Vec<RelayEntry>,
}

impl RelayListMetadata {
    /// A read/write list over `urls`; invalid URLs are rejected.
    pub fn from_urls<I, S>(urls: I) -> Result<Self, Nip65Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for url in urls {
            list.push(RelayEntry::new(url.as_ref(), RelayMarker::ReadWrite)?);
        }
        Ok(list)
    }

    /// Parse from a kind 10002 event.
    ///
    /// Tags with a missing or non-websocket URL are skipped, and a URL listed
    /// twice keeps its first marker.
    pub fn from_event(event: &Event) -> Result<Self, Nip65Error> {
        if event.kind != RELAY_LIST_METADATA_KIND {
            return Err(Nip65Error::InvalidKind(event.kind));
        }

        let mut list = Self::default();
        for tag in event.tags_named(RELAY_TAG) {
            let Some(url) = tag.get(1) else { continue };
            let marker = RelayMarker::parse(tag.get(2).map(String::as_str));
            if let Ok(entry) = RelayEntry::new(url, marker) {
                list.push(entry);
            }
        }
        Ok(list)
    }

    fn push(&mut self, entry: RelayEntry) {
        if !self.relays.iter().any(|r| r.url == entry.url) {
            self.relays.push(entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Draft of a kind 10002 event advertising this list.
    pub fn to_template(&self, created_at: u64) -> EventTemplate {
        EventTemplate {
            created_at,
            kind: RELAY_LIST_METADATA_KIND,
            tags: self.relays.iter().map(RelayEntry::to_tag).collect(),
            content: String::new(),
        }
    }
}

/// Lowercase the scheme/host form and drop a trailing slash.
pub fn normalize_relay_url(url: &str) -> Result<String, Nip65Error> {
    let trimmed = url.trim().trim_end_matches('/');
    let lower = trimmed.to_ascii_lowercase();
    if !(lower.starts_with("wss://") || lower.starts_with("ws://")) || lower.len() <= "wss://".len() {
        return Err(Nip65Error::InvalidUrl(url.to_string()));
    }
    Ok(lower)
}

//! NIP-02: Follow List (Contact List and Petnames)
//!
//! Defines how users publish their follow/contact lists as kind 3 events.
//! Each followed profile is represented by a "p" tag with optional relay URL and petname.
//!
//! Follow lists are the input of the web-of-trust computation, and they come
//! from untrusted authors, so parsing is lenient: a malformed `p` tag is
//! skipped and counted instead of rejecting the whole list.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/02.md>

use crate::nip01::{Event, is_hex_key};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Event kind for contact lists (follow lists)
pub const CONTACT_LIST_KIND: u16 = 3;

/// Errors that can occur during NIP-02 operations
#[derive(Debug, Error)]
pub enum Nip02Error {
    #[error("invalid event kind: expected 3, got {0}")]
    InvalidKind(u16),

    #[error("invalid p-tag format: {0}")]
    InvalidPTag(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// A single contact in a follow list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// The public key of the followed profile (32-byte hex)
    pub pubkey: String,

    /// Optional relay URL where this profile can be found
    pub relay_url: Option<String>,

    /// Optional local petname for this contact
    pub petname: Option<String>,
}

impl Contact {
    /// Create a new contact with just a public key
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            relay_url: None,
            petname: None,
        }
    }

    /// Convert contact to a p-tag array
    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec!["p".to_string(), self.pubkey.clone()];
        tag.push(self.relay_url.clone().unwrap_or_default());
        if let Some(ref petname) = self.petname {
            tag.push(petname.clone());
        }
        tag
    }

    /// Parse a contact from a p-tag array
    pub fn from_tag(tag: &[String]) -> Result<Self, Nip02Error> {
        if tag.first().map(String::as_str) != Some("p") {
            return Err(Nip02Error::InvalidPTag(
                "tag must start with 'p'".to_string(),
            ));
        }

        let pubkey = tag
            .get(1)
            .ok_or_else(|| Nip02Error::InvalidPTag("p-tag must have at least pubkey".to_string()))?
            .to_lowercase();

        if !is_hex_key(&pubkey) {
            return Err(Nip02Error::InvalidPublicKey(format!(
                "pubkey must be 64-character hex, got: {}",
                pubkey
            )));
        }

        let non_empty = |idx: usize| tag.get(idx).filter(|s| !s.is_empty()).cloned();

        Ok(Self {
            pubkey,
            relay_url: non_empty(2),
            petname: non_empty(3),
        })
    }
}

/// Contact list (follow list) event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactList {
    /// Author of the list
    pub owner: String,
    /// Claimed creation time of the list event
    pub created_at: u64,
    /// Unique contacts in tag order
    pub contacts: Vec<Contact>,
    /// Number of `p` tags that were malformed and skipped
    pub skipped: usize,
}

impl ContactList {
    /// Parse a contact list from a kind 3 event.
    ///
    /// Duplicate and malformed `p` tags are dropped.
    pub fn from_event(event: &Event) -> Result<Self, Nip02Error> {
        if event.kind != CONTACT_LIST_KIND {
            return Err(Nip02Error::InvalidKind(event.kind));
        }

        let mut seen = HashSet::new();
        let mut contacts = Vec::new();
        let mut skipped = 0;

        for tag in event.tags_named("p") {
            match Contact::from_tag(tag) {
                Ok(contact) => {
                    if seen.insert(contact.pubkey.clone()) {
                        contacts.push(contact);
                    }
                }
                Err(_) => skipped += 1,
            }
        }

        Ok(Self {
            owner: event.pubkey.clone(),
            created_at: event.created_at,
            contacts,
            skipped,
        })
    }

    /// Check if a public key is in the contact list
    pub fn contains(&self, pubkey: &str) -> bool {
        self.contacts.iter().any(|c| c.pubkey == pubkey)
    }

    /// Iterate the followed public keys
    pub fn pubkeys(&self) -> impl Iterator<Item = &str> {
        self.contacts.iter().map(|c| c.pubkey.as_str())
    }

    /// Get total number of contacts
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Check if contact list is empty
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

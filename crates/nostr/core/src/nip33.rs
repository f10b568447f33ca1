//! NIP-33: Addressable events (formerly "parameterized replaceable").
//!
//! Events with kinds in `30000..40000` are identified by `(kind, pubkey, d)`
//! rather than by id. Tickets and offers are addressable, so relations between
//! them travel as `a` tags carrying a `<kind>:<pubkey>:<d>` address.
//!
//! ```
//! use nostr::Address;
//!
//! let address: Address = "32767:3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d:job-1"
//!     .parse()
//!     .unwrap();
//! assert_eq!(address.kind, 32767);
//! assert_eq!(address.identifier, "job-1");
//! ```

use crate::nip01::{Event, Tag, is_addressable_kind, is_hex_key};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tag name for the d-identifier
pub const D_TAG: &str = "d";

/// Tag name for address references
pub const A_TAG: &str = "a";

/// Errors that can occur during NIP-33 operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Nip33Error {
    #[error("event is not addressable (kind must be 30000-39999), got {0}")]
    NotAddressable(u16),

    #[error("missing required d tag")]
    MissingDTag,

    #[error("invalid address format: {0}")]
    InvalidAddress(String),
}

/// Coordinates of an addressable event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub kind: u16,
    pub pubkey: String,
    pub identifier: String,
}

impl Address {
    pub fn new(kind: u16, pubkey: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            pubkey: pubkey.into(),
            identifier: identifier.into(),
        }
    }

    /// Address of `event`; fails when the kind is not addressable or `d` is absent.
    pub fn from_event(event: &Event) -> Result<Self, Nip33Error> {
        if !is_addressable_kind(event.kind) {
            return Err(Nip33Error::NotAddressable(event.kind));
        }
        let identifier = get_d_tag(event).ok_or(Nip33Error::MissingDTag)?;
        Ok(Self::new(event.kind, event.pubkey.clone(), identifier))
    }

    /// Build an `a` tag pointing at this address.
    pub fn to_tag(&self, relay_url: Option<&str>) -> Tag {
        let mut tag = vec![A_TAG.to_string(), self.to_string()];
        if let Some(url) = relay_url {
            tag.push(url.to_string());
        }
        tag
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.pubkey, self.identifier)
    }
}

impl FromStr for Address {
    type Err = Nip33Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(pubkey), Some(identifier)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Nip33Error::InvalidAddress(
                "address must have format kind:pubkey:dtag".to_string(),
            ));
        };

        let kind = kind
            .parse::<u16>()
            .map_err(|_| Nip33Error::InvalidAddress(format!("invalid kind: {}", kind)))?;

        if !is_addressable_kind(kind) {
            return Err(Nip33Error::InvalidAddress(format!(
                "kind {} is not addressable (must be 30000-39999)",
                kind
            )));
        }

        if !is_hex_key(pubkey) {
            return Err(Nip33Error::InvalidAddress(
                "pubkey must be 64 lowercase hex characters".to_string(),
            ));
        }

        Ok(Self::new(kind, pubkey, identifier))
    }
}

/// The `d` identifier of an event (last `d` tag wins).
pub fn get_d_tag(event: &Event) -> Option<String> {
    event.tag_value(D_TAG).map(str::to_string)
}

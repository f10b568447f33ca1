//! Nostr protocol types for the SatShoot sync layer.
//!
//! This crate provides:
//! - NIP-01: Basic protocol (events, unsigned drafts, tag helpers, filters)
//! - NIP-02: Follow List (Contact List and Petnames)
//! - NIP-33: Addressable events (`kind:pubkey:d` addresses, `a`/`d` tags)
//! - NIP-65: Relay List Metadata
//!
//! Signing and verification are delegated to a signer collaborator; nothing
//! here performs cryptography or I/O.

mod filter;
mod nip01;
mod nip02;
mod nip33;
mod nip65;

// NIP-01: Basic protocol
pub use nip01::{
    Event, EventTemplate, KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_ZAP, KindClassification, Tag,
    UnsignedEvent, classify_kind, is_addressable_kind, is_ephemeral_kind, is_hex_key,
    is_regular_kind, is_replaceable_kind, replace_tag, tag_value,
};

// NIP-01: Subscription filters
pub use filter::{Filter, canonical_key, matches_any};

// NIP-02: Follow List (Contact List and Petnames)
pub use nip02::{CONTACT_LIST_KIND, Contact, ContactList, Nip02Error};

// NIP-33: Addressable events
pub use nip33::{A_TAG, Address, D_TAG, Nip33Error, get_d_tag};

// NIP-65: Relay List Metadata
pub use nip65::{
    Nip65Error, RELAY_LIST_METADATA_KIND, RELAY_TAG, RelayEntry, RelayListMetadata, RelayMarker,
    normalize_relay_url,
};

//! Event kinds used by the marketplace.

use nostr::{
    CONTACT_LIST_KIND, KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_ZAP, RELAY_LIST_METADATA_KIND,
};
use std::fmt;

/// Freelance ticket (addressable)
pub const KIND_TICKET: u16 = 32767;
/// Offer on a ticket (addressable)
pub const KIND_OFFER: u16 = 32768;
/// Review of a finished ticket or offer
pub const KIND_REVIEW: u16 = 1986;

/// Every kind the sync layer subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppKind {
    Ticket,
    Offer,
    EncryptedDirectMessage,
    Review,
    Zap,
    Contacts,
    RelayList,
}

impl AppKind {
    pub const ALL: [AppKind; 7] = [
        AppKind::Ticket,
        AppKind::Offer,
        AppKind::EncryptedDirectMessage,
        AppKind::Review,
        AppKind::Zap,
        AppKind::Contacts,
        AppKind::RelayList,
    ];

    pub fn from_kind(kind: u16) -> Option<Self> {
        match kind {
            KIND_TICKET => Some(AppKind::Ticket),
            KIND_OFFER => Some(AppKind::Offer),
            KIND_ENCRYPTED_DIRECT_MESSAGE => Some(AppKind::EncryptedDirectMessage),
            KIND_REVIEW => Some(AppKind::Review),
            KIND_ZAP => Some(AppKind::Zap),
            CONTACT_LIST_KIND => Some(AppKind::Contacts),
            RELAY_LIST_METADATA_KIND => Some(AppKind::RelayList),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            AppKind::Ticket => KIND_TICKET,
            AppKind::Offer => KIND_OFFER,
            AppKind::EncryptedDirectMessage => KIND_ENCRYPTED_DIRECT_MESSAGE,
            AppKind::Review => KIND_REVIEW,
            AppKind::Zap => KIND_ZAP,
            AppKind::Contacts => CONTACT_LIST_KIND,
            AppKind::RelayList => RELAY_LIST_METADATA_KIND,
        }
    }

    /// Name used as the notification tag.
    pub fn name(self) -> &'static str {
        match self {
            AppKind::Ticket => "Ticket",
            AppKind::Offer => "Offer",
            AppKind::EncryptedDirectMessage => "EncryptedDirectMessage",
            AppKind::Review => "Review",
            AppKind::Zap => "Zap",
            AppKind::Contacts => "Contacts",
            AppKind::RelayList => "RelayList",
        }
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

//! Typed projections over raw events.
//!
//! A projection reads its fields from the event's tag log, where the last tag
//! of a name wins. Setting a single-valued field removes every tag of that
//! name and appends one new tag, so a draft carries at most one tag per field
//! when it is signed. A missing or unparseable tag only fails its own getter.

mod message;
mod offer;
mod review;
mod ticket;

pub use message::Message;
pub use offer::{Offer, OfferPricing, OfferStatus};
pub use review::Review;
pub use ticket::{Ticket, TicketStatus};

use crate::error::Result;
use crate::hub::SubscriptionHub;
use crate::kinds::{KIND_OFFER, KIND_TICKET};
use crate::store::{StoreOptions, StoreUpdate, SubscriptionStore};
use nostr::{Address, Event, Filter, KIND_ZAP, replace_tag};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("missing field `{0}`")]
    Missing(&'static str),

    #[error("invalid value `{value}` for field `{field}`")]
    Invalid { field: &'static str, value: String },

    #[error("expected event kind {expected}, got {found}")]
    WrongKind { expected: u16, found: u16 },
}

/// A typed view over one event of a fixed kind.
pub trait Projection: Sized {
    const KIND: u16;

    fn from_event(event: Arc<Event>) -> std::result::Result<Self, FieldError>;

    fn event(&self) -> &Arc<Event>;

    fn id(&self) -> &str {
        &self.event().id
    }

    fn author(&self) -> &str {
        &self.event().pubkey
    }

    fn created_at(&self) -> u64 {
        self.event().created_at
    }
}

pub(crate) fn expect_kind(event: &Event, expected: u16) -> std::result::Result<(), FieldError> {
    if event.kind == expected {
        Ok(())
    } else {
        Err(FieldError::WrongKind {
            expected,
            found: event.kind,
        })
    }
}

pub(crate) fn required<'a>(
    event: &'a Event,
    field: &'static str,
) -> std::result::Result<&'a str, FieldError> {
    event.tag_value(field).ok_or(FieldError::Missing(field))
}

pub(crate) fn parsed<T: FromStr>(event: &Event, field: &'static str) -> std::result::Result<T, FieldError> {
    let raw = required(event, field)?;
    raw.parse().map_err(|_| FieldError::Invalid {
        field,
        value: raw.to_string(),
    })
}

pub(crate) fn address_field(
    event: &Event,
    field: &'static str,
) -> std::result::Result<Address, FieldError> {
    let raw = required(event, field)?;
    raw.parse().map_err(|_| FieldError::Invalid {
        field,
        value: raw.to_string(),
    })
}

/// Replace-then-append on a copy-on-write event.
pub(crate) fn set_tag(event: &mut Arc<Event>, name: &str, value: impl Into<String>) {
    replace_tag(&mut Arc::make_mut(event).tags, name, value);
}

/// A draft event with no id or signature yet.
pub(crate) fn draft(kind: u16, pubkey: &str, created_at: u64, identifier: &str) -> Event {
    Event {
        id: String::new(),
        pubkey: pubkey.to_string(),
        created_at,
        kind,
        tags: vec![vec!["d".to_string(), identifier.to_string()]],
        content: String::new(),
        sig: String::new(),
    }
}

/// A kind-9735 zap whose `a` tag addresses an offer.
pub fn is_offer_zap(event: &Event) -> bool {
    event.kind == KIND_ZAP
        && event
            .tag_value("a")
            .and_then(|address| address.split(':').next())
            .and_then(|kind| kind.parse::<u16>().ok())
            == Some(KIND_OFFER)
}

/// A tag-value pointing at a ticket kind, as carried by ticket-related
/// direct messages.
pub fn names_ticket_kind(value: &str) -> bool {
    value.contains(&KIND_TICKET.to_string())
}

/// Live, append-only collection of projections related to one value.
///
/// Backed by its own store; entries are never removed.
pub struct Related<P> {
    store: SubscriptionStore,
    _projection: PhantomData<fn() -> P>,
}

impl<P: Projection> Related<P> {
    /// Watch events of `P::KIND` whose `tag_name` tag equals `value`.
    pub async fn watch(hub: &SubscriptionHub, tag_name: &str, value: &str) -> Result<Self> {
        let filter = Filter::new().kinds([P::KIND]).tag(tag_name, [value]);
        let store = SubscriptionStore::new(
            format!("related:{}:{}", tag_name, value),
            hub.clone(),
            vec![filter],
            StoreOptions::live().groupable(true),
        );
        store.start().await?;
        Ok(Self {
            store,
            _projection: PhantomData,
        })
    }

    /// Current members, in arrival order.
    pub fn items(&self) -> Vec<P> {
        self.store
            .snapshot()
            .into_iter()
            .filter_map(|event| P::from_event(event).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn updates(&self) -> broadcast::Receiver<StoreUpdate> {
        self.store.subscribe()
    }

    pub fn stop(&self) {
        self.store.stop();
    }
}

impl<P> Drop for Related<P> {
    fn drop(&mut self) {
        self.store.stop();
    }
}

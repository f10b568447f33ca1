use super::{FieldError, Projection, address_field, draft, expect_kind, parsed, required, set_tag};
use crate::kinds::KIND_OFFER;
use nostr::{Address, Event, UnsignedEvent};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferPricing {
    Absolute = 0,
    SatsPerMinute = 1,
}

impl FromStr for OfferPricing {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "0" => Ok(OfferPricing::Absolute),
            "1" => Ok(OfferPricing::SatsPerMinute),
            _ => Err(()),
        }
    }
}

impl fmt::Display for OfferPricing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferStatus {
    Pending = 0,
    Won = 1,
    Lost = 2,
}

impl FromStr for OfferStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "0" => Ok(OfferStatus::Pending),
            "1" => Ok(OfferStatus::Won),
            "2" => Ok(OfferStatus::Lost),
            _ => Err(()),
        }
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// A bid on a ticket.
#[derive(Debug, Clone)]
pub struct Offer {
    event: Arc<Event>,
}

impl Offer {
    /// Unsigned pending offer on `ticket`.
    pub fn new(pubkey: &str, identifier: &str, created_at: u64, ticket: &Address) -> Self {
        let mut offer = Self {
            event: Arc::new(draft(KIND_OFFER, pubkey, created_at, identifier)),
        };
        offer.set_ticket_address(ticket);
        offer.set_status(OfferStatus::Pending);
        offer
    }

    /// Address of the ticket this offer bids on.
    pub fn ticket_address(&self) -> std::result::Result<Address, FieldError> {
        address_field(&self.event, "a")
    }

    pub fn set_ticket_address(&mut self, ticket: &Address) {
        set_tag(&mut self.event, "a", ticket.to_string());
    }

    pub fn pricing(&self) -> std::result::Result<OfferPricing, FieldError> {
        parsed(&self.event, "pricing")
    }

    pub fn set_pricing(&mut self, pricing: OfferPricing) {
        set_tag(&mut self.event, "pricing", pricing.to_string());
    }

    /// Amount in sats, per minute when pricing is `SatsPerMinute`.
    pub fn amount(&self) -> std::result::Result<u64, FieldError> {
        parsed(&self.event, "amount")
    }

    pub fn set_amount(&mut self, sats: u64) {
        set_tag(&mut self.event, "amount", sats.to_string());
    }

    pub fn status(&self) -> std::result::Result<OfferStatus, FieldError> {
        parsed(&self.event, "status")
    }

    pub fn set_status(&mut self, status: OfferStatus) {
        set_tag(&mut self.event, "status", status.to_string());
    }

    pub fn description(&self) -> &str {
        &self.event.content
    }

    pub fn set_description(&mut self, description: &str) {
        Arc::make_mut(&mut self.event).content = description.to_string();
    }

    pub fn identifier(&self) -> std::result::Result<&str, FieldError> {
        required(&self.event, "d")
    }

    pub fn address(&self) -> std::result::Result<Address, FieldError> {
        Ok(Address::new(KIND_OFFER, self.event.pubkey.as_str(), self.identifier()?))
    }

    pub fn to_unsigned(&self) -> UnsignedEvent {
        self.event.to_unsigned()
    }
}

impl Projection for Offer {
    const KIND: u16 = KIND_OFFER;

    fn from_event(event: Arc<Event>) -> std::result::Result<Self, FieldError> {
        expect_kind(&event, KIND_OFFER)?;
        Ok(Self { event })
    }

    fn event(&self) -> &Arc<Event> {
        &self.event
    }
}

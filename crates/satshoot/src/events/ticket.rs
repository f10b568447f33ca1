use super::{
    FieldError, Projection, Related, address_field, draft, expect_kind, parsed, required, set_tag,
};
use crate::error::Result;
use crate::events::Offer;
use crate::hub::SubscriptionHub;
use crate::kinds::KIND_TICKET;
use nostr::{Address, Event, UnsignedEvent};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    New = 0,
    InProgress = 1,
    Closed = 2,
}

impl FromStr for TicketStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "0" => Ok(TicketStatus::New),
            "1" => Ok(TicketStatus::InProgress),
            "2" => Ok(TicketStatus::Closed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// A freelance job posting.
#[derive(Debug, Clone)]
pub struct Ticket {
    event: Arc<Event>,
    status: std::result::Result<TicketStatus, FieldError>,
    title: std::result::Result<String, FieldError>,
}

impl Ticket {
    /// Unsigned draft with status `New`.
    pub fn new(pubkey: &str, identifier: &str, created_at: u64) -> Self {
        let mut ticket = Self::project(Arc::new(draft(KIND_TICKET, pubkey, created_at, identifier)));
        ticket.set_status(TicketStatus::New);
        ticket
    }

    fn project(event: Arc<Event>) -> Self {
        Self {
            status: parsed(&event, "status"),
            title: required(&event, "title").map(str::to_string),
            event,
        }
    }

    pub fn status(&self) -> std::result::Result<TicketStatus, FieldError> {
        self.status.clone()
    }

    pub fn set_status(&mut self, status: TicketStatus) {
        set_tag(&mut self.event, "status", status.to_string());
        self.status = Ok(status);
    }

    pub fn title(&self) -> std::result::Result<&str, FieldError> {
        self.title.as_deref().map_err(Clone::clone)
    }

    pub fn set_title(&mut self, title: &str) {
        set_tag(&mut self.event, "title", title);
        self.title = Ok(title.to_string());
    }

    pub fn description(&self) -> &str {
        &self.event.content
    }

    pub fn set_description(&mut self, description: &str) {
        Arc::make_mut(&mut self.event).content = description.to_string();
    }

    /// The offer the ticket owner accepted.
    pub fn accepted_offer_address(&self) -> std::result::Result<Address, FieldError> {
        address_field(&self.event, "a")
    }

    pub fn set_accepted_offer_address(&mut self, offer: &Address) {
        set_tag(&mut self.event, "a", offer.to_string());
    }

    /// Every `t` tag value in tag order.
    pub fn t_tags(&self) -> Vec<&str> {
        self.event
            .tags_named("t")
            .filter_map(|tag| tag.get(1).map(String::as_str))
            .collect()
    }

    /// Add a topic; `t` is list-valued, so existing ones stay.
    pub fn add_t_tag(&mut self, topic: &str) {
        if !self.t_tags().contains(&topic) {
            Arc::make_mut(&mut self.event)
                .tags
                .push(vec!["t".to_string(), topic.to_string()]);
        }
    }

    pub fn identifier(&self) -> std::result::Result<&str, FieldError> {
        required(&self.event, "d")
    }

    pub fn address(&self) -> std::result::Result<Address, FieldError> {
        Ok(Address::new(KIND_TICKET, self.event.pubkey.as_str(), self.identifier()?))
    }

    pub fn to_unsigned(&self) -> UnsignedEvent {
        self.event.to_unsigned()
    }

    /// Live set of offers that reference this ticket.
    pub async fn watch_offers(&self, hub: &SubscriptionHub) -> Result<Related<Offer>> {
        let address = self.address()?;
        Related::watch(hub, "a", &address.to_string()).await
    }
}

impl Projection for Ticket {
    const KIND: u16 = KIND_TICKET;

    fn from_event(event: Arc<Event>) -> std::result::Result<Self, FieldError> {
        expect_kind(&event, KIND_TICKET)?;
        Ok(Self::project(event))
    }

    fn event(&self) -> &Arc<Event> {
        &self.event
    }
}

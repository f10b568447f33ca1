use super::{FieldError, Projection, expect_kind, names_ticket_kind, required, set_tag};
use nostr::{Event, KIND_ENCRYPTED_DIRECT_MESSAGE};
use std::sync::Arc;

/// An encrypted direct message. The content stays ciphertext.
#[derive(Debug, Clone)]
pub struct Message {
    event: Arc<Event>,
}

impl Message {
    pub fn recipient(&self) -> Result<&str, FieldError> {
        required(&self.event, "p")
    }

    pub fn set_recipient(&mut self, pubkey: &str) {
        set_tag(&mut self.event, "p", pubkey);
    }

    /// The `t` tag naming a ticket, if the message is about one.
    pub fn related_ticket(&self) -> Result<&str, FieldError> {
        self.event
            .tags_named("t")
            .filter_map(|tag| tag.get(1).map(String::as_str))
            .filter(|value| names_ticket_kind(value))
            .last()
            .ok_or(FieldError::Missing("t"))
    }

    pub fn is_ticket_related(&self) -> bool {
        self.related_ticket().is_ok()
    }

    pub fn content(&self) -> &str {
        &self.event.content
    }
}

impl Projection for Message {
    const KIND: u16 = KIND_ENCRYPTED_DIRECT_MESSAGE;

    fn from_event(event: Arc<Event>) -> Result<Self, FieldError> {
        expect_kind(&event, KIND_ENCRYPTED_DIRECT_MESSAGE)?;
        Ok(Self { event })
    }

    fn event(&self) -> &Arc<Event> {
        &self.event
    }
}

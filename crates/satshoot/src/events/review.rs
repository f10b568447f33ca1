use super::{FieldError, Projection, address_field, expect_kind, parsed, set_tag};
use crate::kinds::KIND_REVIEW;
use nostr::{Address, Event};
use std::sync::Arc;

/// A review left on a ticket or offer.
#[derive(Debug, Clone)]
pub struct Review {
    event: Arc<Event>,
}

impl Review {
    pub fn reviewed_event_address(&self) -> Result<Address, FieldError> {
        address_field(&self.event, "a")
    }

    pub fn rating(&self) -> Result<f64, FieldError> {
        let rating: f64 = parsed(&self.event, "rating")?;
        if rating.is_finite() {
            Ok(rating)
        } else {
            Err(FieldError::Invalid {
                field: "rating",
                value: rating.to_string(),
            })
        }
    }

    pub fn set_rating(&mut self, rating: f64) {
        set_tag(&mut self.event, "rating", rating.to_string());
    }

    pub fn content(&self) -> &str {
        &self.event.content
    }
}

impl Projection for Review {
    const KIND: u16 = KIND_REVIEW;

    fn from_event(event: Arc<Event>) -> Result<Self, FieldError> {
        expect_kind(&event, KIND_REVIEW)?;
        Ok(Self { event })
    }

    fn event(&self) -> &Arc<Event> {
        &self.event
    }
}

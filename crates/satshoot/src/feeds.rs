//! Views computed from store snapshots.

use crate::events::{Message, Projection, is_offer_zap};
use crate::notification::NotificationCategory;
use crate::wot::ScoreSnapshot;
use nostr::Event;
use std::sync::Arc;

/// Direct messages about a ticket.
///
/// With `enforce_wot`, the author must also be trusted by `trust` at
/// `min_score`; without a snapshot nothing passes.
pub fn ticket_related_messages(
    messages: &[Arc<Event>],
    trust: Option<&ScoreSnapshot>,
    min_score: f64,
    enforce_wot: bool,
) -> Vec<Message> {
    messages
        .iter()
        .filter_map(|event| Message::from_event(Arc::clone(event)).ok())
        .filter(|message| message.is_ticket_related())
        .filter(|message| {
            !enforce_wot || trust.is_some_and(|scores| scores.is_trusted(message.author(), min_score))
        })
        .collect()
}

/// Notifications of exactly one category, in list order.
pub fn notifications_of(events: &[Arc<Event>], category: NotificationCategory) -> Vec<Arc<Event>> {
    events
        .iter()
        .filter(|event| NotificationCategory::from_kind(event.kind) == Some(category))
        .cloned()
        .collect()
}

/// Zaps paid to offers.
pub fn offer_zaps(events: &[Arc<Event>]) -> Vec<Arc<Event>> {
    events.iter().filter(|event| is_offer_zap(event)).cloned().collect()
}

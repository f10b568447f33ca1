//! Subscription bookkeeping shared by every relay in a pool.

use nostr::{Event, Filter};
use std::collections::HashSet;
use uuid::Uuid;

/// Generate a unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// What a pool delivers to the owner of one subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    /// A matching event from one relay (duplicates across relays are NOT removed here)
    Event { relay_url: String, event: Event },
    /// One relay finished sending stored events
    Eose { relay_url: String },
    /// Every relay holding the subscription is done with stored events
    AllEose,
    /// A relay refused or terminated the subscription
    Closed { relay_url: String, message: String },
}

/// Tracks which relays have a specific subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionTracker {
    /// Subscription ID
    pub id: String,
    /// Filters for this subscription
    pub filters: Vec<Filter>,
    /// Relays that have this subscription
    pub relays: HashSet<String>,
    /// Whether every relay is done with stored events
    pub all_eose: bool,
    /// Relays that sent EOSE or dropped out
    pub eose_relays: HashSet<String>,
    /// `AllEose` was already handed to the owner
    all_eose_reported: bool,
}

impl SubscriptionTracker {
    /// Create a new subscription tracker.
    pub fn new(id: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            id: id.into(),
            filters,
            relays: HashSet::new(),
            all_eose: false,
            eose_relays: HashSet::new(),
            all_eose_reported: false,
        }
    }

    /// Add (or re-add after reconnect) a relay to this subscription.
    pub fn add_relay(&mut self, relay_url: impl Into<String>) {
        let relay_url = relay_url.into();
        self.eose_relays.remove(&relay_url);
        self.relays.insert(relay_url);
        self.update_all_eose();
    }

    /// Remove a relay from this subscription.
    pub fn remove_relay(&mut self, relay_url: &str) {
        self.relays.remove(relay_url);
        self.eose_relays.remove(relay_url);
        self.update_all_eose();
    }

    /// Mark EOSE received from a relay.
    pub fn mark_eose(&mut self, relay_url: impl Into<String>) {
        let relay_url = relay_url.into();
        if self.relays.contains(&relay_url) {
            self.eose_relays.insert(relay_url);
            self.update_all_eose();
        }
    }

    /// A relay holding the subscription went away; it counts as done.
    pub fn relay_dropped(&mut self, relay_url: &str) {
        self.mark_eose(relay_url);
    }

    /// Update all_eose flag.
    fn update_all_eose(&mut self) {
        self.all_eose = !self.relays.is_empty() && self.relays.len() == self.eose_relays.len();
    }

    /// True exactly once: the first time every relay is done.
    pub fn take_all_eose(&mut self) -> bool {
        if self.all_eose && !self.all_eose_reported {
            self.all_eose_reported = true;
            true
        } else {
            false
        }
    }

    /// Check if a relay has this subscription.
    pub fn has_relay(&self, relay_url: &str) -> bool {
        self.relays.contains(relay_url)
    }

    /// Get the number of relays with this subscription.
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }
}

//! Deduplicated user notifications.
//!
//! Every event is delivered at most once across restarts: the seen-set lives
//! in [`Persistence`] and is checked and updated in a single step. Delivery
//! through a [`DeliveryChannel`] is best effort; the in-app list is always
//! kept.

use crate::config::NotificationConfig;
use crate::error::Result;
use crate::feeds;
use crate::kinds::AppKind;
use crate::persistence::Persistence;
use nostr::Event;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Which part of the app a notification points the user to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    /// A ticket we bid on changed.
    Ticket,
    /// An offer on one of our tickets changed.
    Offer,
    Message,
    Review,
}

impl NotificationCategory {
    pub fn from_kind(kind: u16) -> Option<Self> {
        match AppKind::from_kind(kind)? {
            AppKind::Ticket => Some(NotificationCategory::Ticket),
            AppKind::Offer => Some(NotificationCategory::Offer),
            AppKind::EncryptedDirectMessage => Some(NotificationCategory::Message),
            AppKind::Review => Some(NotificationCategory::Review),
            AppKind::Zap | AppKind::Contacts | AppKind::RelayList => None,
        }
    }

    pub fn app_kind(self) -> AppKind {
        match self {
            NotificationCategory::Ticket => AppKind::Ticket,
            NotificationCategory::Offer => AppKind::Offer,
            NotificationCategory::Message => AppKind::EncryptedDirectMessage,
            NotificationCategory::Review => AppKind::Review,
        }
    }

    pub fn notification(self) -> Notification {
        let (title, body) = match self {
            NotificationCategory::Ticket => ("Offer update arrived!", "Check your Offers!"),
            NotificationCategory::Offer => ("Ticket update arrived!", "Check your Tickets!"),
            NotificationCategory::Message => ("Message arrived!", "Check your Messages!"),
            NotificationCategory::Review => ("Someone left a Review!", "Check your Reviews!"),
        };
        Notification {
            title: title.to_string(),
            body: body.to_string(),
            tag: self.app_kind().name().to_string(),
        }
    }
}

/// Payload handed to the delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub tag: String,
}

/// Classify `event`; `None` for kinds that never notify.
pub fn classify(event: &Event) -> Option<Notification> {
    NotificationCategory::from_kind(event.kind).map(NotificationCategory::notification)
}

/// Push channel to the user (OS notifications, a service worker, a terminal).
pub trait DeliveryChannel: Send + Sync {
    fn is_available(&self) -> bool;

    fn dispatch(&self, notification: Notification);
}

pub struct NotificationGate {
    persistence: Arc<dyn Persistence>,
    channel: RwLock<Option<Arc<dyn DeliveryChannel>>>,
    enabled: AtomicBool,
    recent_limit: usize,
    recent: Mutex<VecDeque<Arc<Event>>>,
    arrivals: broadcast::Sender<Arc<Event>>,
}

impl NotificationGate {
    pub fn new(config: &NotificationConfig, persistence: Arc<dyn Persistence>) -> Self {
        let (arrivals, _) = broadcast::channel(256);
        Self {
            persistence,
            channel: RwLock::new(None),
            enabled: AtomicBool::new(config.enabled),
            recent_limit: config.recent_limit.max(1),
            recent: Mutex::new(VecDeque::new()),
            arrivals,
        }
    }

    pub fn set_channel(&self, channel: Option<Arc<dyn DeliveryChannel>>) {
        *self.channel.write() = channel;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Returns `true` when `event` is new and was recorded.
    ///
    /// Disabled gates and non-notifying kinds leave the seen-set untouched.
    pub fn submit(&self, event: &Arc<Event>) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let Some(notification) = classify(event) else {
            return Ok(false);
        };
        if !self.persistence.seen_insert(&event.id)? {
            debug!("notification for {} already seen", event.id);
            return Ok(false);
        }

        {
            let mut recent = self.recent.lock();
            recent.push_back(Arc::clone(event));
            while recent.len() > self.recent_limit {
                recent.pop_front();
            }
        }
        let _ = self.arrivals.send(Arc::clone(event));

        let channel = self.channel.read().clone();
        match channel {
            Some(channel) if channel.is_available() => {
                info!("notifying: {} ({})", notification.title, event.id);
                channel.dispatch(notification);
            }
            _ => warn!("no delivery channel available, {} kept in-app only", event.id),
        }
        Ok(true)
    }

    pub fn has_seen(&self, id: &str) -> Result<bool> {
        self.persistence.seen_contains(id)
    }

    /// In-app list, oldest first.
    pub fn recent(&self) -> Vec<Arc<Event>> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn recent_of(&self, category: NotificationCategory) -> Vec<Arc<Event>> {
        feeds::notifications_of(&self.recent(), category)
    }

    pub fn arrivals(&self) -> broadcast::Receiver<Arc<Event>> {
        self.arrivals.subscribe()
    }

    /// Clear the in-app list. The seen-set is kept.
    pub fn clear(&self) {
        self.recent.lock().clear();
    }

    /// Clear the in-app list and the seen-set.
    pub fn forget_all(&self) -> Result<()> {
        self.clear();
        self.persistence.seen_clear()
    }
}

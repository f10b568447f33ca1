//! Live, de-duplicated collections of events.
//!
//! A store binds a filter list to the relays through the [`SubscriptionHub`]
//! and keeps every matching event once, keyed by id, in arrival order.
//! Observers get a [`StoreUpdate`] broadcast per change.

use crate::error::Result;
use crate::hub::{HubSubscription, SubscriptionHub};
use crate::transport::WireMessage;
use indexmap::IndexMap;
use nostr::{Event, Filter, matches_any};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// How a store's subscription behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Stop once every relay has sent its stored events
    pub close_on_eose: bool,
    /// May share a wire subscription with identical requests
    pub groupable: bool,
}

impl StoreOptions {
    pub fn live() -> Self {
        Self::default()
    }

    pub fn close_on_eose(mut self, close: bool) -> Self {
        self.close_on_eose = close;
        self
    }

    pub fn groupable(mut self, groupable: bool) -> Self {
        self.groupable = groupable;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Idle,
    Active,
    Stopped,
}

#[derive(Debug, Clone)]
pub enum StoreUpdate {
    Inserted(Arc<Event>),
    /// Every relay finished sending stored events
    Eose,
    Emptied,
    State(StoreState),
}

struct StoreData {
    events: IndexMap<String, Arc<Event>>,
    state: StoreState,
    /// Bumped on every start/stop; ingest from an older run is discarded.
    generation: u64,
    eose: bool,
}

struct StoreInner {
    name: String,
    hub: SubscriptionHub,
    options: StoreOptions,
    filters: RwLock<Vec<Filter>>,
    data: Mutex<StoreData>,
    updates: broadcast::Sender<StoreUpdate>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StoreInner {
    fn publish(&self, update: StoreUpdate) {
        // No observers is fine.
        let _ = self.updates.send(update);
    }

    fn ingest(&self, generation: u64, filters: &[Filter], relay_url: &str, event: Event) {
        let mut data = self.data.lock();
        if data.generation != generation || data.state != StoreState::Active {
            debug!("[{}] discarding late event {}", self.name, event.id);
            return;
        }
        if !matches_any(filters, &event) {
            debug!("[{}] event {} does not match, dropped", self.name, event.id);
            return;
        }
        if data.events.contains_key(&event.id) {
            debug!("[{}] duplicate {} from {}", self.name, event.id, relay_url);
            return;
        }

        let event = Arc::new(event);
        data.events.insert(event.id.clone(), Arc::clone(&event));
        self.publish(StoreUpdate::Inserted(event));
    }

    /// Returns true when the run should end.
    fn all_eose(&self, generation: u64) -> bool {
        let mut data = self.data.lock();
        if data.generation != generation {
            return true;
        }
        data.eose = true;
        self.publish(StoreUpdate::Eose);

        if self.options.close_on_eose {
            data.generation += 1;
            data.state = StoreState::Stopped;
            self.publish(StoreUpdate::State(StoreState::Stopped));
            info!("[{}] backfill complete, stopped", self.name);
            return true;
        }
        false
    }
}

/// A named, live event collection.
#[derive(Clone)]
pub struct SubscriptionStore {
    inner: Arc<StoreInner>,
}

impl SubscriptionStore {
    pub fn new(
        name: impl Into<String>,
        hub: SubscriptionHub,
        filters: Vec<Filter>,
        options: StoreOptions,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                name: name.into(),
                hub,
                options,
                filters: RwLock::new(filters),
                data: Mutex::new(StoreData {
                    events: IndexMap::new(),
                    state: StoreState::Idle,
                    generation: 0,
                    eose: false,
                }),
                updates,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> StoreOptions {
        self.inner.options
    }

    pub fn filters(&self) -> Vec<Filter> {
        self.inner.filters.read().clone()
    }

    /// Replace the filters; takes effect on the next `start`.
    pub fn set_filters(&self, filters: Vec<Filter>) {
        *self.inner.filters.write() = filters;
    }

    /// Edit the filters in place; takes effect on the next `start`.
    pub fn update_filters(&self, edit: impl FnOnce(&mut Vec<Filter>)) {
        edit(&mut *self.inner.filters.write());
    }

    pub fn state(&self) -> StoreState {
        self.inner.data.lock().state
    }

    /// Whether every relay has finished sending stored events in this run.
    pub fn is_backfilled(&self) -> bool {
        self.inner.data.lock().eose
    }

    /// Open the subscription. Starting an active store is a no-op.
    pub async fn start(&self) -> Result<()> {
        let generation = {
            let mut data = self.inner.data.lock();
            if data.state == StoreState::Active {
                return Ok(());
            }
            data.generation += 1;
            data.state = StoreState::Active;
            data.eose = false;
            data.generation
        };
        self.inner.publish(StoreUpdate::State(StoreState::Active));

        let filters = self.filters();
        let subscription = match self
            .inner
            .hub
            .subscribe(filters.clone(), self.inner.options.groupable)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                let mut data = self.inner.data.lock();
                if data.generation == generation {
                    data.state = StoreState::Idle;
                }
                return Err(e);
            }
        };

        // A stop() while the request was in flight wins. The task slot is
        // held so a concurrent stop() cannot miss the new task.
        let stale = {
            let mut slot = self.inner.task.lock();
            if self.inner.data.lock().generation != generation {
                Some(subscription)
            } else {
                info!(
                    "[{}] started on {} ({} filters)",
                    self.inner.name,
                    subscription.wire_id(),
                    filters.len()
                );
                let task = tokio::spawn(run(
                    Arc::clone(&self.inner),
                    generation,
                    filters,
                    subscription,
                ));
                if let Some(previous) = slot.replace(task) {
                    previous.abort();
                }
                None
            }
        };

        if let Some(subscription) = stale {
            debug!("[{}] stopped while starting", self.inner.name);
            subscription.close().await;
        }
        Ok(())
    }

    /// Stop the subscription. No event is inserted after this returns.
    pub fn stop(&self) {
        {
            let mut data = self.inner.data.lock();
            data.generation += 1;
            if data.state == StoreState::Active {
                data.state = StoreState::Stopped;
            }
        }
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        self.inner.publish(StoreUpdate::State(self.state()));
        debug!("[{}] stopped", self.inner.name);
    }

    /// Stop, then start again with the current filters.
    pub async fn restart(&self) -> Result<()> {
        self.stop();
        self.start().await
    }

    /// Drop every collected event; the subscription (if any) stays open.
    pub fn empty(&self) {
        {
            let mut data = self.inner.data.lock();
            data.events.clear();
            data.eose = false;
        }
        self.inner.publish(StoreUpdate::Emptied);
    }

    /// Events in arrival order.
    pub fn snapshot(&self) -> Vec<Arc<Event>> {
        self.inner.data.lock().events.values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Event>> {
        self.inner.data.lock().events.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.data.lock().events.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.data.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.inner.updates.subscribe()
    }
}

async fn run(
    inner: Arc<StoreInner>,
    generation: u64,
    filters: Vec<Filter>,
    mut subscription: HubSubscription,
) {
    while let Some(message) = subscription.messages.recv().await {
        match message {
            WireMessage::Event { relay_url, event } => {
                inner.ingest(generation, &filters, &relay_url, event)
            }
            WireMessage::AllEose => {
                if inner.all_eose(generation) {
                    break;
                }
            }
            WireMessage::Eose { relay_url } => {
                debug!("[{}] EOSE from {}", inner.name, relay_url)
            }
            WireMessage::Closed { relay_url, message } => {
                debug!("[{}] closed by {}: {}", inner.name, relay_url, message)
            }
        }
    }
    subscription.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::test_support::{init_tracing, make_event};
    use std::time::Duration;

    fn setup(relays: usize) -> (Arc<MemoryTransport>, SubscriptionHub) {
        init_tracing();
        let transport = Arc::new(MemoryTransport::new(relays));
        let hub = SubscriptionHub::new(transport.clone());
        (transport, hub)
    }

    async fn next_insert(updates: &mut broadcast::Receiver<StoreUpdate>) -> Arc<Event> {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), updates.recv())
                .await
                .unwrap()
                .unwrap()
            {
                StoreUpdate::Inserted(event) => return event,
                _ => continue,
            }
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let (_transport, hub) = setup(1);
        let store = SubscriptionStore::new(
            "tickets",
            hub,
            vec![Filter::new().kinds([32767])],
            StoreOptions::live(),
        );
        assert_eq!(store.state(), StoreState::Idle);
        store.start().await.unwrap();
        assert_eq!(store.state(), StoreState::Active);
        store.stop();
        assert_eq!(store.state(), StoreState::Stopped);
        store.start().await.unwrap();
        assert_eq!(store.state(), StoreState::Active);
    }

    #[tokio::test]
    async fn test_duplicates_are_dropped_and_order_kept() {
        let (transport, hub) = setup(2);
        let store = SubscriptionStore::new(
            "tickets",
            hub,
            vec![Filter::new().kinds([32767])],
            StoreOptions::live(),
        );
        let mut updates = store.subscribe();
        store.start().await.unwrap();
        let id = transport.wait_for_subscription(0).await;

        let e2 = make_event("e2", "pkB", 32767, 1, vec![]);
        let e1 = make_event("e1", "pkA", 32767, 100, vec![]);
        transport.emit_event(&id, "wss://relay0.test", &e2);
        transport.emit_event(&id, "wss://relay1.test", &e2);
        transport.emit_event(&id, "wss://relay0.test", &e1);

        assert_eq!(next_insert(&mut updates).await.id, "e2");
        assert_eq!(next_insert(&mut updates).await.id, "e1");
        let ids: Vec<_> = store.snapshot().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["e2", "e1"]);
    }

    #[tokio::test]
    async fn test_non_matching_events_dropped() {
        let (transport, hub) = setup(1);
        let store = SubscriptionStore::new(
            "mine",
            hub,
            vec![Filter::new().kinds([32767]).authors(["pkA"])],
            StoreOptions::live(),
        );
        let mut updates = store.subscribe();
        store.start().await.unwrap();
        let id = transport.wait_for_subscription(0).await;

        transport.emit_event(&id, "wss://relay0.test", &make_event("x", "pkB", 32767, 1, vec![]));
        transport.emit_event(&id, "wss://relay0.test", &make_event("y", "pkA", 32767, 1, vec![]));

        assert_eq!(next_insert(&mut updates).await.id, "y");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_no_insert_after_stop() {
        let (transport, hub) = setup(1);
        let store = SubscriptionStore::new(
            "tickets",
            hub,
            vec![Filter::new().kinds([32767])],
            StoreOptions::live(),
        );
        store.start().await.unwrap();
        let id = transport.wait_for_subscription(0).await;

        store.stop();
        transport.emit_event(&id, "wss://relay0.test", &make_event("late", "pkA", 32767, 1, vec![]));
        settle().await;

        assert!(store.is_empty());
        assert!(transport.closed_ids().contains(&id));
    }

    #[tokio::test]
    async fn test_close_on_eose_stops_store() {
        let (transport, hub) = setup(1);
        transport.serve_stored(true);
        transport.store_event(make_event("old", "pkA", 32767, 1, vec![]));

        let store = SubscriptionStore::new(
            "backfill",
            hub,
            vec![Filter::new().kinds([32767])],
            StoreOptions::live().close_on_eose(true),
        );
        let mut updates = store.subscribe();
        store.start().await.unwrap();

        loop {
            if let StoreUpdate::State(StoreState::Stopped) = updates.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(store.state(), StoreState::Stopped);
        assert!(store.is_backfilled());
        assert!(store.contains("old"));
        settle().await;
        assert_eq!(transport.closed_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_keeps_subscription() {
        let (transport, hub) = setup(1);
        let store = SubscriptionStore::new(
            "tickets",
            hub,
            vec![Filter::new().kinds([32767])],
            StoreOptions::live(),
        );
        let mut updates = store.subscribe();
        store.start().await.unwrap();
        let id = transport.wait_for_subscription(0).await;

        transport.emit_event(&id, "wss://relay0.test", &make_event("a", "pkA", 32767, 1, vec![]));
        next_insert(&mut updates).await;
        store.empty();
        assert!(store.is_empty());
        assert_eq!(store.state(), StoreState::Active);

        transport.emit_event(&id, "wss://relay0.test", &make_event("b", "pkA", 32767, 2, vec![]));
        assert_eq!(next_insert(&mut updates).await.id, "b");
        assert!(transport.closed_ids().is_empty());
    }

    #[tokio::test]
    async fn test_filters_apply_on_restart() {
        let (transport, hub) = setup(1);
        let store = SubscriptionStore::new(
            "mine",
            hub,
            vec![Filter::new().kinds([32767])],
            StoreOptions::live(),
        );
        store.start().await.unwrap();
        store.update_filters(|filters| filters[0].authors = vec!["pkA".to_string()]);
        store.restart().await.unwrap();

        let id = transport.wait_for_subscription(1).await;
        assert_eq!(
            transport.filters_of(&id).unwrap()[0].authors,
            vec!["pkA".to_string()]
        );
    }
}

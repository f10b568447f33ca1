//! An in-process [`Transport`] backed by a list of stored events.
//!
//! Every endpoint is simulated; connectivity can be toggled and wire messages
//! injected per subscription. Only built for tests and with the
//! `test-support` feature.

use crate::error::{Result, SyncError};
use crate::transport::{ConnectivityStats, PublishOutcome, Transport, WireMessage, WireSubscription};
use async_trait::async_trait;
use indexmap::IndexMap;
use nostr::{Event, Filter, matches_any};
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::{Notify, mpsc};
use tracing::debug;

struct OpenSubscription {
    filters: Vec<Filter>,
    sink: mpsc::UnboundedSender<WireMessage>,
}

#[derive(Default)]
struct MemoryState {
    endpoints: Vec<String>,
    connected: HashSet<String>,
    reachable: bool,
    connect_calls: usize,
    serve_stored: bool,
    stored: Vec<Event>,
    open: IndexMap<String, OpenSubscription>,
    opened: Vec<String>,
    closed: Vec<String>,
    published: Vec<Event>,
    failing_opens: usize,
    next_id: u64,
}

impl MemoryState {
    fn connected_endpoints(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .filter(|url| self.connected.contains(*url))
            .cloned()
            .collect()
    }
}

pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    opened: Notify,
}

impl MemoryTransport {
    /// `endpoints` simulated relays, all connected and reachable.
    pub fn new(endpoints: usize) -> Self {
        let urls: Vec<String> = (0..endpoints)
            .map(|i| format!("wss://relay{}.test", i))
            .collect();
        let state = MemoryState {
            connected: urls.iter().cloned().collect(),
            endpoints: urls,
            reachable: true,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            opened: Notify::new(),
        }
    }

    /// `endpoints` simulated relays, none connected and none reachable.
    pub fn offline(endpoints: usize) -> Self {
        let transport = Self::new(endpoints);
        {
            let mut state = transport.state.lock();
            state.connected.clear();
            state.reachable = false;
        }
        transport
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.state.lock().endpoints.clone()
    }

    /// Whether later `connect` calls succeed.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Drop every connection; open subscriptions stay registered.
    pub fn drop_connections(&self) {
        self.state.lock().connected.clear();
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    /// Answer new subscriptions from the stored events, once per connected
    /// endpoint, followed by EOSE.
    pub fn serve_stored(&self, serve: bool) {
        self.state.lock().serve_stored = serve;
    }

    pub fn store_event(&self, event: Event) {
        self.state.lock().stored.push(event);
    }

    /// Make the next `count` subscription requests fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().failing_opens = count;
    }

    /// Id of the `index`-th subscription ever opened, waiting for it if needed.
    pub async fn wait_for_subscription(&self, index: usize) -> String {
        loop {
            let notified = self.opened.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(id) = self.state.lock().opened.get(index) {
                return id.clone();
            }
            notified.await;
        }
    }

    pub fn opened_count(&self) -> usize {
        self.state.lock().opened.len()
    }

    pub fn open_ids(&self) -> Vec<String> {
        self.state.lock().open.keys().cloned().collect()
    }

    pub fn closed_ids(&self) -> Vec<String> {
        self.state.lock().closed.clone()
    }

    pub fn filters_of(&self, id: &str) -> Option<Vec<Filter>> {
        self.state.lock().open.get(id).map(|sub| sub.filters.clone())
    }

    pub fn published(&self) -> Vec<Event> {
        self.state.lock().published.clone()
    }

    /// Push a raw wire message into one subscription.
    pub fn emit(&self, id: &str, message: WireMessage) {
        if let Some(sub) = self.state.lock().open.get(id) {
            let _ = sub.sink.send(message);
        }
    }

    pub fn emit_event(&self, id: &str, relay_url: &str, event: &Event) {
        self.emit(
            id,
            WireMessage::Event {
                relay_url: relay_url.to_string(),
                event: event.clone(),
            },
        );
    }

    /// Deliver `event` from `relay_url` to every open subscription it matches.
    pub fn broadcast_event(&self, relay_url: &str, event: &Event) {
        let state = self.state.lock();
        for sub in state.open.values() {
            if matches_any(&sub.filters, event) {
                let _ = sub.sink.send(WireMessage::Event {
                    relay_url: relay_url.to_string(),
                    event: event.clone(),
                });
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoints: &[String]) -> Vec<(String, Result<()>)> {
        let mut state = self.state.lock();
        state.connect_calls += 1;
        endpoints
            .iter()
            .map(|url| {
                if !state.endpoints.contains(url) {
                    state.endpoints.push(url.clone());
                }
                let result = if state.reachable {
                    state.connected.insert(url.clone());
                    Ok(())
                } else {
                    Err(SyncError::TransportMessage(format!("{} unreachable", url)))
                };
                (url.clone(), result)
            })
            .collect()
    }

    async fn disconnect(&self, endpoint: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.endpoints.iter().any(|url| url == endpoint) {
            return Err(SyncError::TransportMessage(format!(
                "unknown relay {}",
                endpoint
            )));
        }
        state.connected.remove(endpoint);
        state.endpoints.retain(|url| url != endpoint);
        Ok(())
    }

    async fn stats(&self) -> ConnectivityStats {
        let state = self.state.lock();
        ConnectivityStats {
            connected: state.connected.len(),
            total: state.endpoints.len(),
        }
    }

    async fn open_subscription(&self, filters: Vec<Filter>) -> Result<WireSubscription> {
        let (sink, messages) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock();
            if state.failing_opens > 0 {
                state.failing_opens -= 1;
                return Err(SyncError::TransportMessage(
                    "subscription refused".to_string(),
                ));
            }

            state.next_id += 1;
            let id = format!("mem-{}", state.next_id);

            if state.serve_stored {
                let relays = state.connected_endpoints();
                for relay_url in &relays {
                    for event in state.stored.iter().filter(|e| matches_any(&filters, e)) {
                        let _ = sink.send(WireMessage::Event {
                            relay_url: relay_url.clone(),
                            event: event.clone(),
                        });
                    }
                    let _ = sink.send(WireMessage::Eose {
                        relay_url: relay_url.clone(),
                    });
                }
                if !relays.is_empty() {
                    let _ = sink.send(WireMessage::AllEose);
                }
            }

            debug!("Opened {} with {} filters", id, filters.len());
            state.open.insert(id.clone(), OpenSubscription { filters, sink });
            state.opened.push(id.clone());
            id
        };
        self.opened.notify_waiters();
        Ok(WireSubscription { id, messages })
    }

    async fn close_subscription(&self, id: &str) {
        let mut state = self.state.lock();
        if state.open.shift_remove(id).is_some() {
            state.closed.push(id.to_string());
        }
    }

    async fn publish(&self, event: &Event) -> Vec<PublishOutcome> {
        let mut state = self.state.lock();
        let relays = state.connected_endpoints();
        if relays.is_empty() {
            return Vec::new();
        }

        state.published.push(event.clone());
        state.stored.push(event.clone());
        for sub in state.open.values() {
            if matches_any(&sub.filters, event) {
                let _ = sub.sink.send(WireMessage::Event {
                    relay_url: relays[0].clone(),
                    event: event.clone(),
                });
            }
        }

        relays
            .into_iter()
            .map(|relay_url| PublishOutcome {
                relay_url,
                accepted: true,
                message: String::new(),
            })
            .collect()
    }
}

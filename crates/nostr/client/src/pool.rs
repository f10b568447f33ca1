//! Relay pool for managing connections to multiple Nostr relays.
//!
//! Relays connect and fail independently. Every subscription opened on the
//! pool is sent to each connected relay, re-sent to relays that (re)connect
//! later, and delivered to its owner over a dedicated channel together with
//! per-relay EOSE and a single pool-wide `AllEose`.

use crate::error::{ClientError, Result};
use crate::message::RelayMessage;
use crate::relay::{ConnectionState, PublishConfirmation, RelayConfig, RelayConnection};
use crate::subscription::{SubscriptionMessage, SubscriptionTracker, generate_subscription_id};
use futures::future::join_all;
use nostr::{Event, Filter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};

/// Connection-level events emitted by the relay pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A relay connected
    Connected { relay_url: String },
    /// A relay disconnected
    Disconnected { relay_url: String },
    /// Notice from a relay
    Notice { relay_url: String, message: String },
    /// A relay asked for NIP-42 authentication
    Auth { relay_url: String, challenge: String },
    /// Connection error
    Error { relay_url: String, error: String },
}

/// Connected relays out of all relays in the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub connected: usize,
    pub total: usize,
}

struct ActiveSubscription {
    tracker: SubscriptionTracker,
    sink: mpsc::UnboundedSender<SubscriptionMessage>,
}

impl ActiveSubscription {
    fn deliver(&self, msg: SubscriptionMessage) {
        if self.sink.send(msg).is_err() {
            debug!("Owner of subscription {} is gone", self.tracker.id);
        }
    }

    fn report_all_eose(&mut self) {
        if self.tracker.take_all_eose() {
            self.deliver(SubscriptionMessage::AllEose);
        }
    }
}

type Subscriptions = Arc<RwLock<HashMap<String, ActiveSubscription>>>;

/// A pool of Nostr relay connections.
pub struct RelayPool {
    /// Connections indexed by URL
    connections: Arc<RwLock<HashMap<String, Arc<RelayConnection>>>>,
    /// Open subscriptions indexed by subscription ID
    subscriptions: Subscriptions,
    /// Broadcast channel for pool events
    events_tx: broadcast::Sender<PoolEvent>,
    /// Settings for every connection the pool creates
    config: RelayConfig,
}

impl RelayPool {
    /// Create a new relay pool.
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a new relay pool whose connections use `config`.
    pub fn with_config(config: RelayConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1000);
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            config,
        }
    }

    /// Subscribe to pool events.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events_tx.subscribe()
    }

    /// Get all relay URLs in the pool.
    pub async fn relay_urls(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Get connection states for all relays.
    pub async fn states(&self) -> HashMap<String, ConnectionState> {
        let conns = self.connections_snapshot().await;
        let mut states = HashMap::new();
        for (url, conn) in conns {
            states.insert(url, conn.state().await);
        }
        states
    }

    /// Check if a relay is connected.
    pub async fn is_connected(&self, url: &str) -> bool {
        let conn = self.connections.read().await.get(url).cloned();
        match conn {
            Some(conn) => conn.is_connected().await,
            None => false,
        }
    }

    async fn connections_snapshot(&self) -> Vec<(String, Arc<RelayConnection>)> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(url, conn)| (url.clone(), Arc::clone(conn)))
            .collect()
    }

    async fn connected(&self) -> Vec<(String, Arc<RelayConnection>)> {
        let mut connected = Vec::new();
        for (url, conn) in self.connections_snapshot().await {
            if conn.is_connected().await {
                connected.push((url, conn));
            }
        }
        connected
    }

    /// Add a relay to the pool. Adding a known relay is a no-op.
    pub async fn add_relay(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        let mut conns = self.connections.write().await;
        if conns.contains_key(&url) {
            return Ok(());
        }

        let conn = RelayConnection::with_config(&url, self.config.clone())?;
        info!("Adding relay to pool: {}", url);
        conns.insert(url, Arc::new(conn));
        Ok(())
    }

    /// Remove a relay from the pool.
    pub async fn remove_relay(&self, url: &str) {
        info!("Removing relay from pool: {}", url);

        let conn = self.connections.write().await.remove(url);
        if let Some(conn) = conn {
            conn.disconnect().await;
        }

        let mut subs = self.subscriptions.write().await;
        for active in subs.values_mut() {
            active.tracker.remove_relay(url);
            active.report_all_eose();
        }
    }

    /// Connect to a specific relay, adding it to the pool first if needed.
    pub async fn connect_relay(&self, url: &str) -> Result<()> {
        self.add_relay(url).await?;
        let conn = self
            .connections
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| ClientError::UnknownRelay(url.to_string()))?;

        if conn.is_connected().await {
            return Ok(());
        }

        let rx = match conn.connect().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Failed to connect to {}: {}", url, e);
                let _ = self.events_tx.send(PoolEvent::Error {
                    relay_url: url.to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        // Hold the subscription table while resubscribing so an early EOSE
        // from this relay cannot be counted before the relay is tracked.
        {
            let mut subs = self.subscriptions.write().await;
            for (id, active) in subs.iter_mut() {
                match conn.subscribe(id, &active.tracker.filters).await {
                    Ok(()) => active.tracker.add_relay(url),
                    Err(e) => warn!("Failed to resubscribe {} on {}: {}", id, url, e),
                }
            }
        }

        self.spawn_message_forwarder(rx, url.to_string());

        let _ = self.events_tx.send(PoolEvent::Connected {
            relay_url: url.to_string(),
        });

        Ok(())
    }

    /// Spawn a task routing one relay's messages to subscription owners.
    fn spawn_message_forwarder(
        &self,
        mut rx: mpsc::UnboundedReceiver<RelayMessage>,
        relay_url: String,
    ) {
        let events_tx = self.events_tx.clone();
        let subscriptions = Arc::clone(&self.subscriptions);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    RelayMessage::Event {
                        subscription_id,
                        event,
                    } => {
                        let subs = subscriptions.read().await;
                        match subs.get(&subscription_id) {
                            Some(active) => active.deliver(SubscriptionMessage::Event {
                                relay_url: relay_url.clone(),
                                event,
                            }),
                            None => debug!(
                                "Dropping event {} for closed subscription {}",
                                event.id, subscription_id
                            ),
                        }
                    }
                    RelayMessage::Eose { subscription_id } => {
                        let mut subs = subscriptions.write().await;
                        if let Some(active) = subs.get_mut(&subscription_id) {
                            active.tracker.mark_eose(&relay_url);
                            active.deliver(SubscriptionMessage::Eose {
                                relay_url: relay_url.clone(),
                            });
                            active.report_all_eose();
                        }
                    }
                    RelayMessage::Closed {
                        subscription_id,
                        message,
                    } => {
                        warn!(
                            "Subscription {} closed by {}: {}",
                            subscription_id, relay_url, message
                        );
                        let mut subs = subscriptions.write().await;
                        if let Some(active) = subs.get_mut(&subscription_id) {
                            active.tracker.relay_dropped(&relay_url);
                            active.deliver(SubscriptionMessage::Closed {
                                relay_url: relay_url.clone(),
                                message,
                            });
                            active.report_all_eose();
                        }
                    }
                    RelayMessage::Ok {
                        event_id, success, ..
                    } => {
                        debug!("OK from {} for {}: {}", relay_url, event_id, success);
                    }
                    RelayMessage::Notice { message } => {
                        let _ = events_tx.send(PoolEvent::Notice {
                            relay_url: relay_url.clone(),
                            message,
                        });
                    }
                    RelayMessage::Auth { challenge } => {
                        let _ = events_tx.send(PoolEvent::Auth {
                            relay_url: relay_url.clone(),
                            challenge,
                        });
                    }
                }
            }

            // Connection closed: whatever this relay still owed counts as done.
            {
                let mut subs = subscriptions.write().await;
                for active in subs.values_mut() {
                    active.tracker.relay_dropped(&relay_url);
                    active.report_all_eose();
                }
            }

            info!("Relay {} disconnected", relay_url);
            let _ = events_tx.send(PoolEvent::Disconnected {
                relay_url: relay_url.clone(),
            });
        });
    }

    /// Connect to all relays in the pool; each relay succeeds or fails on its own.
    pub async fn connect_all(&self) -> Vec<(String, Result<()>)> {
        let urls = self.relay_urls().await;
        let results = join_all(urls.iter().map(|url| self.connect_relay(url))).await;
        urls.into_iter().zip(results).collect()
    }

    /// Disconnect one relay but keep it in the pool.
    pub async fn disconnect_relay(&self, url: &str) -> Result<()> {
        let conn = self
            .connections
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| ClientError::UnknownRelay(url.to_string()))?;
        conn.disconnect().await;
        Ok(())
    }

    /// Disconnect from all relays.
    pub async fn disconnect_all(&self) {
        for (_, conn) in self.connections_snapshot().await {
            conn.disconnect().await;
        }
    }

    /// Publish an event to all connected relays.
    pub async fn publish(&self, event: &Event) -> Vec<(String, Result<PublishConfirmation>)> {
        let connected = self.connected().await;
        let results = join_all(connected.iter().map(|(_, conn)| conn.publish(event))).await;
        connected
            .into_iter()
            .map(|(url, _)| url)
            .zip(results)
            .collect()
    }

    /// Subscribe on all connected relays under a fresh ID.
    pub async fn subscribe_all(
        &self,
        filters: Vec<Filter>,
    ) -> Result<(String, mpsc::UnboundedReceiver<SubscriptionMessage>)> {
        let subscription_id = generate_subscription_id();
        let rx = self.subscribe_with_id(&subscription_id, filters).await?;
        Ok((subscription_id, rx))
    }

    /// Subscribe with a specific subscription ID.
    ///
    /// Relays that connect later receive the same REQ.
    pub async fn subscribe_with_id(
        &self,
        subscription_id: &str,
        filters: Vec<Filter>,
    ) -> Result<mpsc::UnboundedReceiver<SubscriptionMessage>> {
        info!(
            "Creating subscription {} with {} filters",
            subscription_id,
            filters.len()
        );

        let (sink, rx) = mpsc::unbounded_channel();
        let mut tracker = SubscriptionTracker::new(subscription_id, filters);

        let mut subs = self.subscriptions.write().await;
        for (url, conn) in self.connected().await {
            match conn.subscribe(subscription_id, &tracker.filters).await {
                Ok(()) => tracker.add_relay(url),
                Err(e) => warn!("Failed to subscribe on {}: {}", url, e),
            }
        }
        subs.insert(
            subscription_id.to_string(),
            ActiveSubscription { tracker, sink },
        );

        Ok(rx)
    }

    /// Unsubscribe from events on all relays.
    pub async fn unsubscribe(&self, subscription_id: &str) {
        let removed = self.subscriptions.write().await.remove(subscription_id);
        let Some(active) = removed else {
            return;
        };

        info!("Closing subscription {}", subscription_id);

        for (url, conn) in self.connected().await {
            if active.tracker.has_relay(&url)
                && let Err(e) = conn.close_subscription(subscription_id).await
            {
                warn!("Failed to unsubscribe {} on {}: {}", subscription_id, url, e);
            }
        }
    }

    /// Get active subscription IDs.
    pub async fn subscription_ids(&self) -> Vec<String> {
        self.subscriptions.read().await.keys().cloned().collect()
    }

    /// Get the number of connected relays.
    pub async fn connected_count(&self) -> usize {
        self.connected().await.len()
    }

    /// Connected and total relay counts.
    pub async fn stats(&self) -> PoolStats {
        let total = self.connections.read().await.len();
        PoolStats {
            connected: self.connected_count().await,
            total,
        }
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_add_relay() {
        let pool = RelayPool::new();
        pool.add_relay("wss://relay.example.com").await.unwrap();
        pool.add_relay("wss://relay.example.com").await.unwrap();

        let urls = pool.relay_urls().await;
        assert_eq!(urls, vec!["wss://relay.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_pool_add_invalid_relay() {
        let pool = RelayPool::new();
        assert!(pool.add_relay("https://relay.example.com").await.is_err());
        assert!(pool.relay_urls().await.is_empty());
    }

    #[tokio::test]
    async fn test_pool_remove_relay() {
        let pool = RelayPool::new();
        pool.add_relay("wss://relay1.com").await.unwrap();
        pool.add_relay("wss://relay2.com").await.unwrap();

        pool.remove_relay("wss://relay1.com").await;

        let urls = pool.relay_urls().await;
        assert_eq!(urls.len(), 1);
        assert!(urls.contains(&"wss://relay2.com".to_string()));
    }

    #[tokio::test]
    async fn test_pool_stats_none_connected() {
        let pool = RelayPool::new();
        pool.add_relay("wss://relay.example.com").await.unwrap();

        assert_eq!(pool.connected_count().await, 0);
        assert_eq!(
            pool.stats().await,
            PoolStats {
                connected: 0,
                total: 1
            }
        );
        assert_eq!(
            pool.states().await.get("wss://relay.example.com"),
            Some(&ConnectionState::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_subscription_lifecycle_without_relays() {
        let pool = RelayPool::new();
        let (id, _rx) = pool
            .subscribe_all(vec![Filter::new().kinds([1])])
            .await
            .unwrap();
        assert_eq!(pool.subscription_ids().await, vec![id.clone()]);

        pool.unsubscribe(&id).await;
        assert!(pool.subscription_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_relay() {
        let pool = RelayPool::new();
        assert!(matches!(
            pool.disconnect_relay("wss://nowhere.example.com").await,
            Err(ClientError::UnknownRelay(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_without_connections() {
        let pool = RelayPool::new();
        pool.add_relay("wss://relay.example.com").await.unwrap();
        let event = Event {
            id: "e".repeat(64),
            pubkey: "a".repeat(64),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        };
        assert!(pool.publish(&event).await.is_empty());
    }
}

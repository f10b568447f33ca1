//! The transport seam between the sync core and relay connectivity.
//!
//! [`RelayPool`] is the production implementation; tests drive the core with
//! an in-memory transport instead.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use nostr::{Event, Filter};
use nostr_client::{ClientError, RelayPool};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use nostr_client::SubscriptionMessage as WireMessage;

/// Connected endpoints out of all known endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectivityStats {
    pub connected: usize,
    pub total: usize,
}

/// A live wire-level subscription.
#[derive(Debug)]
pub struct WireSubscription {
    pub id: String,
    pub messages: mpsc::UnboundedReceiver<WireMessage>,
}

/// Per-endpoint result of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub relay_url: String,
    pub accepted: bool,
    pub message: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect every endpoint independently; one failure never aborts the rest.
    async fn connect(&self, endpoints: &[String]) -> Vec<(String, Result<()>)>;

    /// Disconnect and forget `endpoint`; it no longer counts in [`stats`].
    ///
    /// [`stats`]: Transport::stats
    async fn disconnect(&self, endpoint: &str) -> Result<()>;

    async fn stats(&self) -> ConnectivityStats;

    /// Open a subscription on every connected endpoint (and endpoints that
    /// connect later).
    async fn open_subscription(&self, filters: Vec<Filter>) -> Result<WireSubscription>;

    async fn close_subscription(&self, id: &str);

    async fn publish(&self, event: &Event) -> Vec<PublishOutcome>;
}

#[async_trait]
impl Transport for RelayPool {
    async fn connect(&self, endpoints: &[String]) -> Vec<(String, Result<()>)> {
        let attempts = join_all(
            endpoints
                .iter()
                .map(|endpoint| self.connect_relay(endpoint.as_str())),
        )
        .await;

        endpoints
            .iter()
            .cloned()
            .zip(attempts.into_iter().map(|r| r.map_err(SyncError::from)))
            .collect()
    }

    async fn disconnect(&self, endpoint: &str) -> Result<()> {
        if !self.relay_urls().await.iter().any(|url| url == endpoint) {
            return Err(ClientError::UnknownRelay(endpoint.to_string()).into());
        }
        self.remove_relay(endpoint).await;
        Ok(())
    }

    async fn stats(&self) -> ConnectivityStats {
        let stats = RelayPool::stats(self).await;
        ConnectivityStats {
            connected: stats.connected,
            total: stats.total,
        }
    }

    async fn open_subscription(&self, filters: Vec<Filter>) -> Result<WireSubscription> {
        let (id, messages) = self.subscribe_all(filters).await?;
        Ok(WireSubscription { id, messages })
    }

    async fn close_subscription(&self, id: &str) {
        self.unsubscribe(id).await;
    }

    async fn publish(&self, event: &Event) -> Vec<PublishOutcome> {
        RelayPool::publish(self, event)
            .await
            .into_iter()
            .map(|(relay_url, result)| match result {
                Ok(confirmation) => PublishOutcome {
                    relay_url,
                    accepted: confirmation.accepted,
                    message: confirmation.message,
                },
                Err(e) => PublishOutcome {
                    relay_url,
                    accepted: false,
                    message: e.to_string(),
                },
            })
            .collect()
    }
}

/// Fetch stored events matching `filters` once.
///
/// Collects until every endpoint has sent EOSE or `timeout` elapses, then
/// closes the subscription. Duplicates from several relays are collapsed.
pub async fn fetch_events(
    transport: &dyn Transport,
    filters: Vec<Filter>,
    timeout: Duration,
) -> Result<Vec<Event>> {
    let WireSubscription { id, mut messages } = transport.open_subscription(filters).await?;
    let mut events: IndexMap<String, Event> = IndexMap::new();

    let collect = async {
        while let Some(message) = messages.recv().await {
            match message {
                WireMessage::Event { event, .. } => {
                    events.entry(event.id.clone()).or_insert(event);
                }
                WireMessage::AllEose => break,
                WireMessage::Eose { relay_url } => {
                    debug!("{} finished stored events for {}", relay_url, id)
                }
                WireMessage::Closed { relay_url, message } => {
                    debug!("{} closed {}: {}", relay_url, id, message)
                }
            }
        }
    };

    if tokio::time::timeout(timeout, collect).await.is_err() {
        warn!(
            "Fetch {} timed out after {:?}, returning partial results",
            id, timeout
        );
    }

    transport.close_subscription(&id).await;
    Ok(events.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::test_support::make_event;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pool_disconnect_forgets_endpoint() {
        let pool = RelayPool::new();
        pool.add_relay("wss://a.example.com").await.unwrap();
        pool.add_relay("wss://b.example.com").await.unwrap();
        assert_eq!(Transport::stats(&pool).await.total, 2);

        Transport::disconnect(&pool, "wss://a.example.com").await.unwrap();
        let stats = Transport::stats(&pool).await;
        assert_eq!(stats, ConnectivityStats { connected: 0, total: 1 });
        assert_eq!(pool.relay_urls().await, vec!["wss://b.example.com".to_string()]);

        assert!(matches!(
            Transport::disconnect(&pool, "wss://a.example.com").await,
            Err(SyncError::Transport(ClientError::UnknownRelay(_)))
        ));
    }

    #[tokio::test]
    async fn test_fetch_events_dedups_and_closes() {
        let transport = Arc::new(MemoryTransport::new(2));
        let filter = Filter::new().kinds([3]);
        let e1 = make_event("e1", "pkA", 3, 10, vec![]);

        let fetch = {
            let transport = Arc::clone(&transport);
            let filter = filter.clone();
            tokio::spawn(async move {
                fetch_events(transport.as_ref(), vec![filter], Duration::from_secs(5)).await
            })
        };

        let id = transport.wait_for_subscription(0).await;
        transport.emit_event(&id, "wss://a", &e1);
        transport.emit_event(&id, "wss://b", &e1);
        transport.emit(&id, WireMessage::AllEose);

        let events = fetch.await.unwrap().unwrap();
        assert_eq!(events, vec![e1]);
        assert!(transport.closed_ids().contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_events_timeout_returns_partial() {
        let transport = Arc::new(MemoryTransport::new(1));
        let e1 = make_event("e1", "pkA", 3, 10, vec![]);

        let fetch = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                fetch_events(
                    transport.as_ref(),
                    vec![Filter::new().kinds([3])],
                    Duration::from_secs(2),
                )
                .await
            })
        };

        let id = transport.wait_for_subscription(0).await;
        transport.emit_event(&id, "wss://a", &e1);

        let events = fetch.await.unwrap().unwrap();
        assert_eq!(events.len(), 1);
        assert!(transport.closed_ids().contains(&id));
    }
}

//! Relay connectivity supervision.
//!
//! The manager polls aggregate connectivity. When no relay is connected it
//! runs a single retry loop with a fixed delay and a bounded attempt count;
//! when the attempts run out it emits [`ConnectivitySignal::RelaysDown`] once
//! for that down-period. The next poll that finds a relay connected resets
//! the budget and emits [`ConnectivitySignal::Restored`].

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::transport::{ConnectivityStats, Transport};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connectivity edges observable by dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivitySignal {
    /// At least one relay became reachable
    Connected { connected: usize, total: usize },
    /// A reconnect attempt is about to run
    Reconnecting { attempt: u32, remaining: u32 },
    /// Retries exhausted; fired once per down-period
    RelaysDown,
    /// Connectivity came back after a down-period
    Restored,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
}

impl From<&ConnectionConfig> for RetryPolicy {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            poll_interval: config.poll_interval(),
        }
    }
}

struct RetryState {
    retries_left: u32,
    down_signalled: bool,
}

struct Inner {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    endpoints: RwLock<Vec<String>>,
    connected: watch::Sender<bool>,
    signals: broadcast::Sender<ConnectivitySignal>,
    retry_in_flight: AtomicBool,
    retry: Mutex<RetryState>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn emit(&self, signal: ConnectivitySignal) {
        let _ = self.signals.send(signal);
    }

    fn on_healthy(&self, stats: ConnectivityStats) {
        let was_down = {
            let mut retry = self.retry.lock();
            let was_down = retry.down_signalled || retry.retries_left < self.policy.max_retries;
            retry.retries_left = self.policy.max_retries;
            retry.down_signalled = false;
            was_down
        };

        let became_connected = self.connected.send_if_modified(|connected| {
            let changed = !*connected;
            *connected = true;
            changed
        });

        if became_connected {
            info!("Connected to {}/{} relays", stats.connected, stats.total);
            self.emit(ConnectivitySignal::Connected {
                connected: stats.connected,
                total: stats.total,
            });
        }
        if was_down {
            info!("Relay connectivity restored");
            self.emit(ConnectivitySignal::Restored);
        }
    }

    fn mark_down(&self) {
        self.connected.send_if_modified(|connected| {
            let changed = *connected;
            *connected = false;
            changed
        });
    }
}

/// Owns the relay endpoint set and keeps it connected.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        let (connected, _) = watch::channel(false);
        let (signals, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                transport,
                policy,
                endpoints: RwLock::new(Vec::new()),
                connected,
                signals,
                retry_in_flight: AtomicBool::new(false),
                retry: Mutex::new(RetryState {
                    retries_left: policy.max_retries,
                    down_signalled: false,
                }),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.inner.endpoints.read().clone()
    }

    /// Add `endpoints` and connect them; each one succeeds or fails alone.
    pub async fn connect(&self, endpoints: &[String]) -> Vec<(String, Result<()>)> {
        {
            let mut known = self.inner.endpoints.write();
            for endpoint in endpoints {
                if !known.contains(endpoint) {
                    known.push(endpoint.clone());
                }
            }
        }

        let results = self.inner.transport.connect(endpoints).await;
        for (endpoint, result) in &results {
            if let Err(e) = result {
                warn!("Failed to connect to {}: {}", endpoint, e);
            }
        }
        self.check().await;
        results
    }

    pub async fn disconnect(&self, endpoint: &str) -> Result<()> {
        self.inner.endpoints.write().retain(|e| e != endpoint);
        self.inner.transport.disconnect(endpoint).await
    }

    pub async fn stats(&self) -> ConnectivityStats {
        self.inner.transport.stats().await
    }

    /// One immediate reconnect attempt over every known endpoint.
    pub async fn reconnect(&self) -> ConnectivityStats {
        let endpoints = self.endpoints();
        info!("Reconnecting {} relays", endpoints.len());
        self.inner.transport.connect(&endpoints).await;
        let stats = self.stats().await;
        if stats.connected > 0 {
            self.inner.on_healthy(stats);
        }
        stats
    }

    /// Poll connectivity once, starting the retry loop when nothing is connected.
    pub async fn check(&self) -> ConnectivityStats {
        let stats = self.stats().await;
        if stats.connected > 0 {
            self.inner.on_healthy(stats);
        } else {
            self.inner.mark_down();
            self.spawn_retry();
        }
        stats
    }

    fn spawn_retry(&self) {
        if self
            .inner
            .retry_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Retry already in flight");
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            retry_loop(&inner).await;
            inner.retry_in_flight.store(false, Ordering::Release);
        });
    }

    /// Poll every `poll_interval` until [`ConnectionManager::stop_monitor`].
    pub fn start_monitor(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.policy.poll_interval;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ConnectionManager { inner }.check().await;
            }
        });
        if let Some(previous) = self.inner.monitor.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn stop_monitor(&self) {
        if let Some(task) = self.inner.monitor.lock().take() {
            task.abort();
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
    }

    pub fn signals(&self) -> broadcast::Receiver<ConnectivitySignal> {
        self.inner.signals.subscribe()
    }

    pub fn retries_left(&self) -> u32 {
        self.inner.retry.lock().retries_left
    }

    pub fn is_retrying(&self) -> bool {
        self.inner.retry_in_flight.load(Ordering::Acquire)
    }
}

async fn retry_loop(inner: &Inner) {
    loop {
        let stats = inner.transport.stats().await;
        if stats.connected > 0 {
            inner.on_healthy(stats);
            return;
        }

        let (attempt, remaining) = {
            let mut retry = inner.retry.lock();
            if retry.retries_left == 0 {
                if !retry.down_signalled {
                    retry.down_signalled = true;
                    drop(retry);
                    warn!(
                        "All relays down after {} reconnect attempts",
                        inner.policy.max_retries
                    );
                    inner.emit(ConnectivitySignal::RelaysDown);
                }
                return;
            }
            retry.retries_left -= 1;
            (
                inner.policy.max_retries - retry.retries_left,
                retry.retries_left,
            )
        };

        info!(
            "No relay connected, reconnect attempt {} in {:?}",
            attempt, inner.policy.retry_delay
        );
        inner.emit(ConnectivitySignal::Reconnecting { attempt, remaining });
        tokio::time::sleep(inner.policy.retry_delay).await;

        let endpoints = inner.endpoints.read().clone();
        for (endpoint, result) in inner.transport.connect(&endpoints).await {
            if let Err(e) = result {
                debug!("Reconnect to {} failed: {}", endpoint, e);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.monitor.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::test_support::init_tracing;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
        }
    }

    async fn wait_for(
        signals: &mut broadcast::Receiver<ConnectivitySignal>,
        wanted: ConnectivitySignal,
    ) {
        loop {
            if signals.recv().await.unwrap() == wanted {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_connect_reports_connected() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::offline(0));
        transport.set_reachable(true);
        let manager = ConnectionManager::new(transport.clone(), policy(3));
        let mut signals = manager.signals();

        let results = manager
            .connect(&["wss://a.test".to_string(), "wss://b.test".to_string()])
            .await;
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(manager.is_connected());
        assert_eq!(
            signals.recv().await.unwrap(),
            ConnectivitySignal::Connected {
                connected: 2,
                total: 2
            }
        );
    }

    #[tokio::test]
    async fn test_disconnect_drops_endpoint_from_stats() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::offline(0));
        transport.set_reachable(true);
        let manager = ConnectionManager::new(transport.clone(), policy(3));
        manager
            .connect(&["wss://a.test".to_string(), "wss://b.test".to_string()])
            .await;

        manager.disconnect("wss://a.test").await.unwrap();
        assert_eq!(manager.endpoints(), vec!["wss://b.test".to_string()]);
        assert_eq!(
            manager.stats().await,
            ConnectivityStats {
                connected: 1,
                total: 1
            }
        );
        assert!(manager.disconnect("wss://a.test").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_signals_once() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::offline(2));
        let manager = ConnectionManager::new(transport.clone(), policy(3));
        let mut signals = manager.signals();

        let endpoints = transport.endpoints();
        manager.connect(&endpoints).await;
        assert!(!manager.is_connected());

        wait_for(&mut signals, ConnectivitySignal::RelaysDown).await;
        // One initial connect plus exactly three retries.
        assert_eq!(transport.connect_calls(), 4);
        assert_eq!(manager.retries_left(), 0);

        // Still down: further polls neither retry nor signal again.
        for _ in 0..5 {
            manager.check().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        assert_eq!(transport.connect_calls(), 4);
        assert!(matches!(
            signals.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_resets_budget() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::offline(1));
        let manager = ConnectionManager::new(transport.clone(), policy(2));
        let mut signals = manager.signals();

        manager.connect(&transport.endpoints()).await;
        wait_for(&mut signals, ConnectivitySignal::RelaysDown).await;

        transport.set_reachable(true);
        let stats = manager.reconnect().await;
        assert_eq!(stats.connected, 1);
        assert!(manager.is_connected());
        assert_eq!(manager.retries_left(), 2);
        wait_for(&mut signals, ConnectivitySignal::Restored).await;

        // A new down-period gets a fresh budget and a fresh signal.
        transport.set_reachable(false);
        transport.drop_connections();
        manager.check().await;
        wait_for(&mut signals, ConnectivitySignal::RelaysDown).await;
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_midway() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::offline(1));
        let manager = ConnectionManager::new(transport.clone(), policy(5));
        let mut signals = manager.signals();

        manager.connect(&transport.endpoints()).await;
        wait_for(
            &mut signals,
            ConnectivitySignal::Reconnecting {
                attempt: 1,
                remaining: 4,
            },
        )
        .await;
        transport.set_reachable(true);

        wait_for(&mut signals, ConnectivitySignal::Restored).await;
        assert!(manager.is_connected());
        assert_eq!(manager.retries_left(), 5);
        assert!(transport.connect_calls() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_retry_loop_in_flight() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::offline(1));
        let manager = ConnectionManager::new(transport.clone(), policy(2));
        let mut signals = manager.signals();

        manager.connect(&transport.endpoints()).await;
        manager.check().await;
        manager.check().await;
        assert!(manager.is_retrying());

        wait_for(&mut signals, ConnectivitySignal::RelaysDown).await;
        assert_eq!(transport.connect_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_detects_drop() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::new(1));
        let manager = ConnectionManager::new(transport.clone(), policy(1));
        let mut signals = manager.signals();
        manager.connect(&transport.endpoints()).await;
        assert!(manager.is_connected());

        manager.start_monitor();
        transport.set_reachable(false);
        transport.drop_connections();

        wait_for(&mut signals, ConnectivitySignal::RelaysDown).await;
        assert!(!manager.is_connected());
        manager.stop_monitor();
    }
}

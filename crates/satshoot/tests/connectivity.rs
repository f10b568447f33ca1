mod common;

use common::init_tracing;
use satshoot::{ConnectivitySignal, MemoryPersistence, MemoryTransport, Session, SyncConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn offline_session(max_retries: u32) -> (Session, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::offline(3));
    let mut config = SyncConfig::default();
    config.relays = transport.endpoints();
    config.connection.max_retries = max_retries;
    config.connection.retry_delay_ms = 1_000;
    config.connection.poll_interval_ms = 2_000;
    let session = Session::new(config, transport.clone(), Arc::new(MemoryPersistence::new()));
    (session, transport)
}

/// Collect signals until `last` shows up.
async fn collect_until(
    signals: &mut broadcast::Receiver<ConnectivitySignal>,
    last: ConnectivitySignal,
) -> Vec<ConnectivitySignal> {
    let mut seen = Vec::new();
    loop {
        let signal = signals.recv().await.unwrap();
        let done = signal == last;
        seen.push(signal);
        if done {
            return seen;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn unreachable_relays_exhaust_retries_then_signal_once() {
    init_tracing();
    let (session, transport) = offline_session(4);
    let mut signals = session.connection().signals();

    let stats = session.connect().await;
    assert_eq!(stats.connected, 0);
    assert_eq!(stats.total, 3);

    let seen = collect_until(&mut signals, ConnectivitySignal::RelaysDown).await;
    let attempts: Vec<_> = seen
        .iter()
        .filter_map(|signal| match signal {
            ConnectivitySignal::Reconnecting { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2, 3, 4]);
    assert_eq!(transport.connect_calls(), 5);

    // The monitor keeps polling but the down-period is already reported.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.connect_calls(), 5);
    loop {
        match signals.try_recv() {
            Ok(ConnectivitySignal::RelaysDown) => panic!("relays-down reported twice"),
            Ok(_) => continue,
            Err(_) => break,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn connectivity_comes_back_after_down_period() {
    init_tracing();
    let (session, transport) = offline_session(2);
    let mut signals = session.connection().signals();
    session.connect().await;
    collect_until(&mut signals, ConnectivitySignal::RelaysDown).await;

    transport.set_reachable(true);
    let stats = session.connection().reconnect().await;
    assert_eq!(stats.connected, 3);

    let seen = collect_until(&mut signals, ConnectivitySignal::Restored).await;
    assert!(!seen.contains(&ConnectivitySignal::RelaysDown));
    assert!(session.connection().is_connected());
    assert_eq!(session.connection().retries_left(), 2);
}

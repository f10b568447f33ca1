mod common;

use common::{event, eventually, init_tracing, pubkey, within};
use nostr::Filter;
use satshoot::events::{Projection, Ticket};
use satshoot::hub::SubscriptionHub;
use satshoot::{KIND_TICKET, MemoryTransport, StoreOptions, StoreState, SubscriptionStore, WireMessage};
use std::sync::Arc;

fn ticket_store(transport: &Arc<MemoryTransport>, filters: Vec<Filter>) -> SubscriptionStore {
    let hub = SubscriptionHub::new(transport.clone());
    SubscriptionStore::new("tickets", hub, filters, StoreOptions::live())
}

#[tokio::test]
async fn merged_ticket_filters_keep_arrival_order_without_duplicates() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new(2));
    let pk_a = pubkey('a');
    let pk_b = pubkey('b');
    let store = ticket_store(
        &transport,
        vec![
            Filter::new().kinds([KIND_TICKET]).authors(Vec::<String>::new()),
            Filter::new().kinds([KIND_TICKET]).authors([pk_a.clone()]),
        ],
    );
    store.start().await.unwrap();
    let id = within(transport.wait_for_subscription(0)).await;

    let e1 = event("e1", &pk_a, KIND_TICKET, &[&["d", "one"]]);
    let e2 = event("e2", &pk_b, KIND_TICKET, &[&["d", "two"]]);
    transport.emit_event(&id, "wss://relay0.test", &e1);
    transport.emit_event(&id, "wss://relay1.test", &e1);
    transport.emit_event(&id, "wss://relay0.test", &e2);
    transport.emit(&id, WireMessage::AllEose);

    eventually(|| store.is_backfilled()).await;
    let ids: Vec<_> = store.snapshot().iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec!["e1", "e2"]);
}

#[tokio::test]
async fn duplicate_from_two_relays_is_stored_once() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new(2));
    let store = ticket_store(&transport, vec![Filter::new().kinds([KIND_TICKET])]);
    let mut updates = store.subscribe();
    store.start().await.unwrap();
    let id = within(transport.wait_for_subscription(0)).await;

    let ticket = event("t1", &pubkey('a'), KIND_TICKET, &[&["title", "Fix my node"]]);
    for relay in transport.endpoints() {
        transport.emit_event(&id, &relay, &ticket);
    }
    transport.emit(&id, WireMessage::AllEose);
    eventually(|| store.is_backfilled()).await;

    assert_eq!(store.len(), 1);
    let mut inserted = 0;
    while let Ok(update) = updates.try_recv() {
        if matches!(update, satshoot::StoreUpdate::Inserted(_)) {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);

    let projected = Ticket::from_event(store.get("t1").unwrap()).unwrap();
    assert_eq!(projected.title(), Ok("Fix my node"));
    assert_eq!(projected.author(), pubkey('a'));
}

#[tokio::test]
async fn stopped_store_ignores_late_events() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new(1));
    let store = ticket_store(&transport, vec![Filter::new().kinds([KIND_TICKET])]);
    store.start().await.unwrap();
    let id = within(transport.wait_for_subscription(0)).await;

    transport.emit_event(&id, "wss://relay0.test", &event("t1", &pubkey('a'), KIND_TICKET, &[]));
    eventually(|| store.contains("t1")).await;

    store.stop();
    assert_eq!(store.state(), StoreState::Stopped);
    transport.emit_event(&id, "wss://relay0.test", &event("t2", &pubkey('a'), KIND_TICKET, &[]));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!store.contains("t2"));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn stored_events_are_backfilled_from_every_relay() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new(3));
    transport.serve_stored(true);
    transport.store_event(event("t1", &pubkey('a'), KIND_TICKET, &[]));
    transport.store_event(event("t2", &pubkey('b'), KIND_TICKET, &[]));
    transport.store_event(event("x", &pubkey('b'), 1, &[]));

    let store = SubscriptionStore::new(
        "backfill",
        SubscriptionHub::new(transport.clone()),
        vec![Filter::new().kinds([KIND_TICKET])],
        StoreOptions::live().close_on_eose(true),
    );
    store.start().await.unwrap();

    eventually(|| store.state() == StoreState::Stopped).await;
    assert!(store.is_backfilled());
    let ids: Vec<_> = store.snapshot().iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec!["t1", "t2"]);
}

#[tokio::test]
async fn event_at_since_boundary_is_kept() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new(1));
    let boundary = event("t-edge", &pubkey('a'), KIND_TICKET, &[]);
    let mut older = event("t-old", &pubkey('a'), KIND_TICKET, &[]);
    older.created_at = boundary.created_at - 1;

    let store = ticket_store(
        &transport,
        vec![Filter::new().kinds([KIND_TICKET]).since(boundary.created_at)],
    );
    store.start().await.unwrap();
    let id = within(transport.wait_for_subscription(0)).await;

    transport.emit_event(&id, "wss://relay0.test", &older);
    transport.emit_event(&id, "wss://relay0.test", &boundary);
    transport.emit(&id, WireMessage::AllEose);
    eventually(|| store.is_backfilled()).await;

    let ids: Vec<_> = store.snapshot().iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec!["t-edge"]);
}

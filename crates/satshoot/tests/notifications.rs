mod common;

use common::{event, init_tracing, pubkey};
use nostr::{Event, KIND_ENCRYPTED_DIRECT_MESSAGE};
use parking_lot::Mutex;
use satshoot::config::NotificationConfig;
use satshoot::notification::classify;
use satshoot::{
    DeliveryChannel, KIND_OFFER, Notification, NotificationCategory, NotificationGate, Persistence,
    SqlitePersistence,
};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Default)]
struct Inbox {
    delivered: Mutex<Vec<Notification>>,
}

impl DeliveryChannel for Inbox {
    fn is_available(&self) -> bool {
        true
    }

    fn dispatch(&self, notification: Notification) {
        self.delivered.lock().push(notification);
    }
}

fn enabled() -> NotificationConfig {
    NotificationConfig {
        enabled: true,
        ..Default::default()
    }
}

fn gate_with_inbox(persistence: Arc<dyn Persistence>) -> (NotificationGate, Arc<Inbox>) {
    let gate = NotificationGate::new(&enabled(), persistence);
    let inbox = Arc::new(Inbox::default());
    let channel: Arc<dyn DeliveryChannel> = inbox.clone();
    gate.set_channel(Some(channel));
    (gate, inbox)
}

fn shared(event: Event) -> Arc<Event> {
    Arc::new(event)
}

#[test]
fn offer_and_message_are_classified_apart() {
    let offer = event("o1", &pubkey('a'), KIND_OFFER, &[]);
    let message = event("m1", &pubkey('a'), KIND_ENCRYPTED_DIRECT_MESSAGE, &[]);

    assert_eq!(classify(&offer).map(|n| n.tag), Some("Offer".to_string()));
    assert_eq!(
        classify(&message).map(|n| n.tag),
        Some("EncryptedDirectMessage".to_string())
    );
    assert_eq!(
        NotificationCategory::from_kind(offer.kind),
        Some(NotificationCategory::Offer)
    );
    assert_eq!(
        NotificationCategory::from_kind(message.kind),
        Some(NotificationCategory::Message)
    );
}

#[test]
fn same_event_from_two_relays_notifies_once() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let persistence = Arc::new(SqlitePersistence::open(&dir.path().join("seen.db")).unwrap());
    let (gate, inbox) = gate_with_inbox(persistence);

    // The same id reaching us through two relays.
    let first = shared(event("m1", &pubkey('b'), KIND_ENCRYPTED_DIRECT_MESSAGE, &[]));
    let second = shared(event("m1", &pubkey('b'), KIND_ENCRYPTED_DIRECT_MESSAGE, &[]));
    assert!(gate.submit(&first).unwrap());
    assert!(!gate.submit(&second).unwrap());

    let delivered = inbox.delivered.lock();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].title, "Message arrived!");
    assert_eq!(gate.recent().len(), 1);
}

#[test]
fn seen_set_survives_restart() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("seen.db");
    let offer = shared(event("o1", &pubkey('b'), KIND_OFFER, &[]));

    {
        let persistence = Arc::new(SqlitePersistence::open(&path).unwrap());
        let (gate, inbox) = gate_with_inbox(persistence);
        assert!(gate.submit(&offer).unwrap());
        assert_eq!(inbox.delivered.lock().len(), 1);
    }

    let persistence = Arc::new(SqlitePersistence::open(&path).unwrap());
    let (gate, inbox) = gate_with_inbox(persistence);
    assert!(!gate.submit(&offer).unwrap());
    assert!(inbox.delivered.lock().is_empty());
    assert!(gate.recent().is_empty());
}

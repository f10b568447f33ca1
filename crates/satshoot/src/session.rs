//! The signed-in user's view of the network.
//!
//! A [`Session`] owns every named store plus the connection manager, the web
//! of trust and the notification gate. [`Session::initialize`] brings them up
//! in dependency order for the signer's key; [`Session::logout`] tears the
//! user-specific state down again without touching relay connectivity.

use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, RetryPolicy};
use crate::error::{Result, SyncError};
use crate::events::{Message, Projection};
use crate::feeds;
use crate::hub::SubscriptionHub;
use crate::kinds::{KIND_OFFER, KIND_REVIEW, KIND_TICKET};
use crate::notification::NotificationGate;
use crate::persistence::Persistence;
use crate::store::{StoreOptions, StoreUpdate, SubscriptionStore};
use crate::transport::{ConnectivityStats, PublishOutcome, Transport, fetch_events};
use crate::wot::{GraphSource, RelayGraphSource, WotEngine};
use async_trait::async_trait;
use nostr::{
    Address, Event, Filter, KIND_ENCRYPTED_DIRECT_MESSAGE, KIND_ZAP, RELAY_LIST_METADATA_KIND,
    RelayListMetadata, UnsignedEvent,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Identity and signing, supplied by the embedding application.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn public_key(&self) -> Result<String>;

    async fn sign(&self, event: UnsignedEvent) -> Result<Event>;
}

/// Every named store of a session.
#[derive(Clone)]
pub struct SessionStores {
    pub my_tickets: SubscriptionStore,
    pub my_offers: SubscriptionStore,
    pub all_tickets: SubscriptionStore,
    pub all_offers: SubscriptionStore,
    pub messages: SubscriptionStore,
    pub reviews: SubscriptionStore,
    pub received_zaps: SubscriptionStore,
}

impl SessionStores {
    fn new(hub: &SubscriptionHub, message_limit: u64) -> Self {
        let live = StoreOptions::live();
        let store = |name: &str, filters: Vec<Filter>| {
            SubscriptionStore::new(name, hub.clone(), filters, live)
        };
        Self {
            my_tickets: store("my_tickets", authored_filters(KIND_TICKET, None)),
            my_offers: store("my_offers", authored_filters(KIND_OFFER, None)),
            all_tickets: store("all_tickets", vec![Filter::new().kinds([KIND_TICKET])]),
            all_offers: store("all_offers", vec![Filter::new().kinds([KIND_OFFER])]),
            messages: store("messages", message_filters(None, message_limit)),
            reviews: store("reviews", vec![Filter::new().kinds([KIND_REVIEW])]),
            received_zaps: store("received_zaps", zap_filters(None)),
        }
    }

    pub fn all(&self) -> [&SubscriptionStore; 7] {
        [
            &self.my_tickets,
            &self.my_offers,
            &self.all_tickets,
            &self.all_offers,
            &self.messages,
            &self.reviews,
            &self.received_zaps,
        ]
    }
}

fn authored_filters(kind: u16, user: Option<&str>) -> Vec<Filter> {
    vec![Filter::new().kinds([kind]).authors(user)]
}

/// Received and sent direct messages.
fn message_filters(user: Option<&str>, limit: u64) -> Vec<Filter> {
    let mut received = Filter::new()
        .kinds([KIND_ENCRYPTED_DIRECT_MESSAGE])
        .limit(limit);
    if let Some(user) = user {
        received = received.tag("p", [user]);
    }
    let sent = Filter::new()
        .kinds([KIND_ENCRYPTED_DIRECT_MESSAGE])
        .authors(user)
        .limit(limit);
    vec![received, sent]
}

fn zap_filters(user: Option<&str>) -> Vec<Filter> {
    let zaps = Filter::new().kinds([KIND_ZAP]);
    match user {
        Some(user) => vec![zaps.tag("p", [user])],
        None => vec![zaps],
    }
}

pub struct Session {
    config: SyncConfig,
    connection: ConnectionManager,
    hub: SubscriptionHub,
    wot: Arc<WotEngine>,
    graph: Arc<dyn GraphSource>,
    notifications: Arc<NotificationGate>,
    stores: SessionStores,
    signer: RwLock<Option<Arc<dyn Signer>>>,
    user: RwLock<Option<String>>,
    retry_init: AtomicBool,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let connection =
            ConnectionManager::new(Arc::clone(&transport), RetryPolicy::from(&config.connection));
        let hub = SubscriptionHub::new(Arc::clone(&transport));
        let wot = Arc::new(
            WotEngine::new(config.wot.clone()).with_persistence(Arc::clone(&persistence)),
        );
        let graph: Arc<dyn GraphSource> =
            Arc::new(RelayGraphSource::new(Arc::clone(&transport), &config.wot));
        let notifications = Arc::new(NotificationGate::new(&config.notifications, persistence));
        let stores = SessionStores::new(&hub, config.message_limit);

        Self {
            config,
            connection,
            hub,
            wot,
            graph,
            notifications,
            stores,
            signer: RwLock::new(None),
            user: RwLock::new(None),
            retry_init: AtomicBool::new(false),
            forwarders: Mutex::new(Vec::new()),
        }
    }

    /// Read follow lists from `graph` instead of the relays.
    pub fn with_graph_source(mut self, graph: Arc<dyn GraphSource>) -> Self {
        self.graph = graph;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    pub fn wot(&self) -> &Arc<WotEngine> {
        &self.wot
    }

    pub fn notifications(&self) -> &Arc<NotificationGate> {
        &self.notifications
    }

    pub fn stores(&self) -> &SessionStores {
        &self.stores
    }

    pub fn set_signer(&self, signer: Option<Arc<dyn Signer>>) {
        *self.signer.write() = signer;
    }

    pub fn has_signer(&self) -> bool {
        self.signer.read().is_some()
    }

    /// Public key of the initialized user.
    pub fn user(&self) -> Option<String> {
        self.user.read().clone()
    }

    /// Set after a failed initialization until one succeeds.
    pub fn retry_pending(&self) -> bool {
        self.retry_init.load(Ordering::SeqCst)
    }

    /// Connect the configured relays and start supervising them.
    pub async fn connect(&self) -> ConnectivityStats {
        self.connection.connect(&self.config.relays).await;
        self.connection.start_monitor();
        self.connection.stats().await
    }

    /// Start the public ticket and offer stores; no signer needed.
    pub async fn start_public(&self) -> Result<()> {
        self.stores.all_tickets.start().await?;
        self.stores.all_offers.start().await
    }

    /// Bring the session up for the signer's key.
    ///
    /// A failure is retried once after a full reset. If the retry fails too,
    /// later calls do not retry again until an initialization succeeds.
    pub async fn initialize(&self) -> Result<String> {
        let error = match self.initialize_once().await {
            Ok(user) => {
                self.retry_init.store(false, Ordering::SeqCst);
                return Ok(user);
            }
            Err(e) => e,
        };

        if self.retry_init.swap(true, Ordering::SeqCst) {
            error!("Could not initialize user: {}", error);
            return Err(error);
        }

        warn!("Could not initialize user: {}. Retrying...", error);
        self.reset();
        let user = self.initialize_once().await?;
        self.retry_init.store(false, Ordering::SeqCst);
        Ok(user)
    }

    async fn initialize_once(&self) -> Result<String> {
        let signer = self.signer.read().clone().ok_or(SyncError::NoSigner)?;
        let user = signer.public_key().await?;
        info!("Initializing user {}", user);
        *self.user.write() = Some(user.clone());

        let me = Some(user.as_str());
        self.stores
            .my_tickets
            .set_filters(authored_filters(KIND_TICKET, me));
        self.stores
            .my_offers
            .set_filters(authored_filters(KIND_OFFER, me));
        self.stores.my_tickets.start().await?;
        self.stores.my_offers.start().await?;

        self.ensure_relay_list(signer.as_ref(), &user).await?;
        self.refresh_trust(&user).await?;

        self.stores.all_tickets.start().await?;
        self.stores.all_offers.start().await?;

        self.stores
            .messages
            .set_filters(message_filters(me, self.config.message_limit));
        self.stores.received_zaps.set_filters(zap_filters(me));
        self.spawn_forwarders(&user);

        self.stores.messages.start().await?;
        self.stores.reviews.start().await?;
        self.stores.received_zaps.start().await?;

        info!("User {} initialized", user);
        Ok(user)
    }

    /// Publish a relay list built from the configured relays when the user
    /// has none yet.
    async fn ensure_relay_list(&self, signer: &dyn Signer, user: &str) -> Result<()> {
        let filter = Filter::new()
            .kinds([RELAY_LIST_METADATA_KIND])
            .authors([user]);
        let existing = fetch_events(
            self.hub.transport().as_ref(),
            vec![filter],
            self.config.wot.fetch_timeout(),
        )
        .await?;
        if let Some(event) = existing.iter().max_by_key(|event| event.created_at) {
            let list = RelayListMetadata::from_event(event)?;
            debug!("User relay list has {} relays", list.relays.len());
            return Ok(());
        }

        info!("No relay list found, publishing the default one");
        let list = RelayListMetadata::from_urls(&self.config.relays)?;
        let unsigned = list.to_template(now_secs()).into_unsigned(user);
        let outcomes = self.publish_signed(signer, unsigned).await?;
        if !outcomes.iter().any(|outcome| outcome.accepted) {
            warn!("No relay accepted the relay list");
        }
        Ok(())
    }

    async fn refresh_trust(&self, user: &str) -> Result<()> {
        if self.wot.scores().is_none() {
            match self.wot.load_persisted() {
                Ok(true) => debug!("Using persisted trust scores"),
                Ok(false) => {}
                Err(e) => warn!("Could not load persisted trust scores: {}", e),
            }
        }
        match self.wot.refresh_if_stale(user, self.graph.as_ref()).await {
            Ok(_) => Ok(()),
            // A user without a follow list has no web of trust yet.
            Err(SyncError::WotUnavailable(reason)) => {
                warn!("Continuing without trust scores: {}", reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Sign with the current signer and publish to every connected relay.
    pub async fn publish(&self, event: UnsignedEvent) -> Result<Vec<PublishOutcome>> {
        let signer = self.signer.read().clone().ok_or(SyncError::NoSigner)?;
        self.publish_signed(signer.as_ref(), event).await
    }

    async fn publish_signed(
        &self,
        signer: &dyn Signer,
        event: UnsignedEvent,
    ) -> Result<Vec<PublishOutcome>> {
        let event = signer.sign(event).await?;
        let outcomes = self.hub.transport().publish(&event).await;
        if outcomes.is_empty() {
            return Err(SyncError::NoRelays);
        }
        for outcome in outcomes.iter().filter(|outcome| !outcome.accepted) {
            warn!(
                "{} rejected {}: {}",
                outcome.relay_url, event.id, outcome.message
            );
        }
        Ok(outcomes)
    }

    /// Ticket-related direct messages, trust-filtered when configured.
    pub fn message_feed(&self) -> Vec<Message> {
        let scores = self.wot.scores();
        feeds::ticket_related_messages(
            &self.stores.messages.snapshot(),
            scores.as_deref(),
            self.config.wot.min_score,
            self.config.feeds.enforce_wot_on_messages,
        )
    }

    /// Received zaps paid to offers.
    pub fn offer_zaps(&self) -> Vec<Arc<Event>> {
        feeds::offer_zaps(&self.stores.received_zaps.snapshot())
    }

    /// Forget everything about the user. Relays stay connected.
    pub fn logout(&self) -> Result<()> {
        info!("Logging out");
        self.reset();
        self.notifications.clear();
        *self.signer.write() = None;
        *self.user.write() = None;
        self.wot.clear()
    }

    /// Stop and empty every store and point authored filters at nobody.
    fn reset(&self) {
        for task in self.forwarders.lock().drain(..) {
            task.abort();
        }
        for store in self.stores.all() {
            store.stop();
            store.empty();
        }
        self.stores
            .my_tickets
            .set_filters(authored_filters(KIND_TICKET, None));
        self.stores
            .my_offers
            .set_filters(authored_filters(KIND_OFFER, None));
        self.stores
            .messages
            .set_filters(message_filters(None, self.config.message_limit));
        self.stores.received_zaps.set_filters(zap_filters(None));
    }

    /// Route new events that concern the user to the notification gate.
    fn spawn_forwarders(&self, user: &str) {
        let mut forwarders = self.forwarders.lock();
        for task in forwarders.drain(..) {
            task.abort();
        }

        let me = user.to_string();
        forwarders.push(forward(
            &self.stores.messages,
            Arc::clone(&self.notifications),
            move |event| event.pubkey != me && event.tag_value("p") == Some(me.as_str()),
        ));

        let me = user.to_string();
        forwarders.push(forward(
            &self.stores.reviews,
            Arc::clone(&self.notifications),
            move |event| event.pubkey != me && event.tag_value("p") == Some(me.as_str()),
        ));

        // Offers on our tickets.
        let me = user.to_string();
        forwarders.push(forward(
            &self.stores.all_offers,
            Arc::clone(&self.notifications),
            move |event| {
                event.pubkey != me
                    && event
                        .tag_value("a")
                        .and_then(|a| a.parse::<Address>().ok())
                        .is_some_and(|ticket| ticket.kind == KIND_TICKET && ticket.pubkey == me)
            },
        ));

        // Updates to tickets we bid on.
        let me = user.to_string();
        let my_offers = self.stores.my_offers.clone();
        forwarders.push(forward(
            &self.stores.all_tickets,
            Arc::clone(&self.notifications),
            move |event| {
                if event.pubkey == me {
                    return false;
                }
                let Ok(address) = Address::from_event(event) else {
                    return false;
                };
                let address = address.to_string();
                let bids: HashSet<String> = my_offers
                    .snapshot()
                    .iter()
                    .filter_map(|offer| offer.tag_value("a").map(str::to_string))
                    .collect();
                bids.contains(&address)
            },
        ));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in self.forwarders.lock().drain(..) {
            task.abort();
        }
    }
}

fn forward<F>(
    store: &SubscriptionStore,
    gate: Arc<NotificationGate>,
    concerns_user: F,
) -> JoinHandle<()>
where
    F: Fn(&Event) -> bool + Send + 'static,
{
    let mut updates = store.subscribe();
    let name = store.name().to_string();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(StoreUpdate::Inserted(event)) if concerns_user(event.as_ref()) => {
                    if let Err(e) = gate.submit(&event) {
                        warn!("[{}] notification for {} failed: {}", name, event.id, e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("[{}] notification forwarder skipped {} updates", name, skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::persistence::MemoryPersistence;
    use crate::test_support::{init_tracing, make_event, pubkey};
    use crate::wot::ScoreSnapshot;
    use nostr::ContactList;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    struct TestSigner {
        pubkey: String,
        failures: AtomicUsize,
    }

    impl TestSigner {
        fn new(pubkey: String, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                pubkey,
                failures: AtomicUsize::new(failures),
            })
        }
    }

    #[async_trait]
    impl Signer for TestSigner {
        async fn public_key(&self) -> Result<String> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SyncError::Signer("locked".to_string()));
            }
            Ok(self.pubkey.clone())
        }

        async fn sign(&self, event: UnsignedEvent) -> Result<Event> {
            Ok(Event {
                id: format!("signed-{}-{}", event.kind, event.created_at),
                pubkey: event.pubkey,
                created_at: event.created_at,
                kind: event.kind,
                tags: event.tags,
                content: event.content,
                sig: "0".repeat(128),
            })
        }
    }

    struct EmptyGraph;

    #[async_trait]
    impl GraphSource for EmptyGraph {
        async fn follow_lists(&self, _authors: &[String]) -> Result<Vec<ContactList>> {
            Ok(Vec::new())
        }
    }

    fn session(transport: Arc<MemoryTransport>) -> Session {
        let mut config = SyncConfig::default();
        config.relays = transport.endpoints();
        config.wot.fetch_timeout_ms = 200;
        Session::new(config, transport, Arc::new(MemoryPersistence::new()))
            .with_graph_source(Arc::new(EmptyGraph))
    }

    fn signer_for(session: &Session, signer: Arc<TestSigner>) {
        let signer: Arc<dyn Signer> = signer;
        session.set_signer(Some(signer));
    }

    #[tokio::test]
    async fn test_initialize_without_signer() {
        init_tracing();
        let session = session(Arc::new(MemoryTransport::new(1)));
        assert!(matches!(
            session.initialize().await,
            Err(SyncError::NoSigner)
        ));
        // The retry failed too; the flag stays armed.
        assert!(session.retry_pending());
    }

    #[tokio::test]
    async fn test_initialize_starts_stores_and_publishes_relay_list() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::new(2));
        transport.serve_stored(true);
        let session = session(transport.clone());
        signer_for(&session, TestSigner::new(pubkey('a'), 0));

        let user = session.initialize().await.unwrap();
        assert_eq!(user, pubkey('a'));
        assert_eq!(session.user(), Some(pubkey('a')));
        for store in session.stores().all() {
            assert_eq!(store.state(), crate::store::StoreState::Active, "{}", store.name());
        }
        assert_eq!(
            session.stores().my_tickets.filters()[0].authors,
            vec![pubkey('a')]
        );
        assert_eq!(
            session.stores().messages.filters()[0].tag_values("p"),
            Some(&[pubkey('a')][..])
        );

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].kind, RELAY_LIST_METADATA_KIND);
        assert_eq!(published[0].tags_named("r").count(), 2);
    }

    #[tokio::test]
    async fn test_existing_relay_list_not_republished() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::new(1));
        transport.serve_stored(true);
        transport.store_event(make_event(
            "rl",
            &pubkey('a'),
            RELAY_LIST_METADATA_KIND,
            5,
            vec![vec!["r", "wss://relay.example.com"]],
        ));
        let session = session(transport.clone());
        signer_for(&session, TestSigner::new(pubkey('a'), 0));

        session.initialize().await.unwrap();
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_retries_once() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::new(1));
        transport.serve_stored(true);
        let session = session(transport);
        signer_for(&session, TestSigner::new(pubkey('a'), 1));

        assert_eq!(session.initialize().await.unwrap(), pubkey('a'));
        assert!(!session.retry_pending());
    }

    #[tokio::test]
    async fn test_initialize_gives_up_after_one_retry() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::new(1));
        transport.serve_stored(true);
        let session = session(transport);
        signer_for(&session, TestSigner::new(pubkey('a'), 3));

        assert!(session.initialize().await.is_err());
        assert!(session.retry_pending());
        // Armed flag: no second retry on the next call.
        assert!(session.initialize().await.is_err());

        assert_eq!(session.initialize().await.unwrap(), pubkey('a'));
        assert!(!session.retry_pending());
    }

    #[tokio::test]
    async fn test_logout_clears_user_state() {
        init_tracing();
        let transport = Arc::new(MemoryTransport::new(1));
        transport.serve_stored(true);
        let session = session(transport.clone());
        signer_for(&session, TestSigner::new(pubkey('a'), 0));
        session.initialize().await.unwrap();
        session.wot().install(ScoreSnapshot::new(
            pubkey('a'),
            now_secs(),
            HashMap::from([(pubkey('b'), 1.0)]),
        ));
        let my_ticket = make_event("t1", &pubkey('a'), KIND_TICKET, 1, vec![vec!["d", "job"]]);
        transport.broadcast_event("wss://relay0.test", &my_ticket);
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !session.stores().my_tickets.contains("t1") {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        session.logout().unwrap();

        assert!(!session.has_signer());
        assert_eq!(session.user(), None);
        assert!(session.wot().scores().is_none());
        for store in session.stores().all() {
            assert!(store.is_empty(), "{}", store.name());
            assert_ne!(store.state(), crate::store::StoreState::Active);
        }
        assert!(session.stores().my_tickets.filters()[0].authors.is_empty());
        assert_eq!(transport.stats().await.connected, 1);
    }
}

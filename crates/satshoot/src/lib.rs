//! Event sync and trust filtering for the SatShoot freelance marketplace.
//!
//! Tickets, offers, direct messages, reviews and zaps arrive from many
//! untrusted relays, unordered and duplicated. This crate turns that stream
//! into deduplicated live stores, scores authors by a bounded walk of the
//! follow graph, projects raw events into typed views and gates user
//! notifications so each event is announced once.
//!
//! ```rust,no_run
//! use satshoot::{MemoryPersistence, Session, SyncConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> satshoot::Result<()> {
//!     let transport = Arc::new(nostr_client::RelayPool::new());
//!     let session = Session::new(
//!         SyncConfig::default(),
//!         transport,
//!         Arc::new(MemoryPersistence::new()),
//!     );
//!     session.connect().await;
//!     session.start_public().await?;
//!     println!("{} tickets", session.stores().all_tickets.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod feeds;
pub mod hub;
pub mod kinds;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod notification;
pub mod persistence;
pub mod session;
pub mod store;
pub mod transport;
pub mod wot;

#[cfg(test)]
mod test_support;

pub use config::{SyncConfig, default_config_path, load_config, save_config};
pub use connection::{ConnectionManager, ConnectivitySignal, RetryPolicy};
pub use error::{Result, SyncError};
pub use events::{FieldError, Message, Offer, Projection, Review, Ticket};
pub use kinds::{AppKind, KIND_OFFER, KIND_REVIEW, KIND_TICKET};
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryTransport;
pub use notification::{DeliveryChannel, Notification, NotificationCategory, NotificationGate};
pub use persistence::{MemoryPersistence, Persistence, SqlitePersistence};
pub use session::{Session, SessionStores, Signer};
pub use store::{StoreOptions, StoreState, StoreUpdate, SubscriptionStore};
pub use transport::{ConnectivityStats, Transport, WireMessage};
pub use wot::{GraphSource, RelayGraphSource, ScoreSnapshot, WotEngine};

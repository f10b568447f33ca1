//! Nostr relay WebSocket client.
//!
//! This crate provides:
//! - WebSocket connections to Nostr relays
//! - Message parsing (NIP-01 relay protocol)
//! - Per-subscription EOSE tracking across relays
//! - Connection pooling for multiple relays
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr::Filter;
//! use nostr_client::{RelayPool, SubscriptionMessage};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = RelayPool::new();
//!     pool.add_relay("wss://relay.damus.io").await.unwrap();
//!     pool.connect_all().await;
//!
//!     let filter = Filter::new().kinds([32767]).limit(10);
//!     let (_id, mut rx) = pool.subscribe_all(vec![filter]).await.unwrap();
//!
//!     while let Some(msg) = rx.recv().await {
//!         match msg {
//!             SubscriptionMessage::Event { event, .. } => println!("event {}", event.id),
//!             SubscriptionMessage::AllEose => break,
//!             _ => {}
//!         }
//!     }
//! }
//! ```

mod error;
mod message;
mod pool;
mod relay;
mod subscription;

pub use error::{ClientError, Result};
pub use message::{ClientMessage, MessageError, RelayMessage};
pub use pool::{PoolEvent, PoolStats, RelayPool};
pub use relay::{ConnectionState, PublishConfirmation, RelayConfig, RelayConnection};
pub use subscription::{SubscriptionMessage, SubscriptionTracker, generate_subscription_id};

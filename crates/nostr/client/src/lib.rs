//! Nostr relay WebSocket client.
//!
//! This crate provides:
//! - Supervised WebSocket connections to Nostr relays with backoff reconnect
//! - Message parsing (NIP-01 relay protocol)
//! - Logical subscriptions that span every relay in a pool
//! - A relay pool with fan-out publish and fan-in query
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_client::{Filter, RelayPool, DEFAULT_RELAYS};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = RelayPool::new();
//!     let urls: Vec<String> = DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect();
//!     for (url, result) in pool.connect(&urls).await {
//!         if let Err(e) = result {
//!             eprintln!("{url}: {e}");
//!         }
//!     }
//!
//!     let filter = Filter::new().kinds(vec![5700]).limit(10);
//!     let events = pool.query(vec![filter], Duration::from_secs(5)).await.unwrap();
//!     println!("{} job requests", events.len());
//! }
//! ```

mod error;
mod message;
mod pool;
mod recovery;
mod relay;
mod subscription;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{ClientError, Result};
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use pool::{PoolEvent, PublishReport, RelayPool};
pub use recovery::ExponentialBackoff;
pub use relay::{ConnectionState, RelayConfig, RelayConnection, RelayStatus};
pub use subscription::{
    Dispatch, EoseCallback, EventCallback, SubscriptionItem, SubscriptionManager,
    SubscriptionSink, SubscriptionTracker, generate_subscription_id,
};

/// Relays used when nothing else is configured.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://relay.primal.net",
    "wss://nos.lol",
];

//! Seam between the job engine and the relay transport.

use async_trait::async_trait;
use nostr::Event;
use nostr_client::{Filter, PublishReport, RelayPool, Result};
use std::time::Duration;

/// What the publisher and client need from the relays.
///
/// [`RelayPool`] is the production implementation; tests substitute an
/// in-memory relay.
#[async_trait]
pub trait RelayApi: Send + Sync {
    /// Send to every connected relay. Errors only when no relay took it.
    async fn publish(&self, event: &Event) -> Result<PublishReport>;

    /// Collect stored events matching `filters`, de-duplicated by id.
    async fn query(&self, filters: Vec<Filter>, wait: Duration) -> Result<Vec<Event>>;
}

#[async_trait]
impl RelayApi for RelayPool {
    async fn publish(&self, event: &Event) -> Result<PublishReport> {
        RelayPool::publish(self, event).await
    }

    async fn query(&self, filters: Vec<Filter>, wait: Duration) -> Result<Vec<Event>> {
        RelayPool::query(self, filters, wait).await
    }
}

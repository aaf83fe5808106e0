//! Relay pool for managing connections to multiple Nostr relays.
//!
//! The pool fans writes out to every connected relay and fans reads back in
//! through the shared [`SubscriptionManager`]. Relays can be added and removed
//! while the pool is in use; callers address the pool, never a relay list.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter};
use crate::relay::{RelayConfig, RelayConnection, RelayStatus};
use crate::subscription::{
    EoseCallback, EventCallback, SubscriptionItem, SubscriptionManager, SubscriptionSink,
    generate_subscription_id,
};
use futures::future::join_all;
use nostr::Event;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};

/// Events emitted by the relay pool.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A relay connected
    Connected { relay_url: String },
    /// A relay disconnected
    Disconnected { relay_url: String },
    /// OK response for a published event
    Ok {
        relay_url: String,
        event_id: String,
        success: bool,
        message: String,
    },
    /// Notice from a relay
    Notice { relay_url: String, message: String },
    /// A relay ended one of our subscriptions
    Closed {
        relay_url: String,
        subscription_id: String,
        message: String,
    },
}

/// Where a published event went.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub event_id: String,
    /// Relays the event was written to
    pub sent_to: Vec<String>,
    /// Relays that were skipped, with the reason
    pub failed: Vec<(String, String)>,
}

impl PublishReport {
    pub fn is_success(&self) -> bool {
        !self.sent_to.is_empty()
    }
}

/// A pool of Nostr relay connections.
pub struct RelayPool {
    config: RelayConfig,
    /// Connections indexed by URL
    connections: RwLock<HashMap<String, Arc<RelayConnection>>>,
    subscriptions: Arc<SubscriptionManager>,
    /// Broadcast channel for pool events
    events_tx: broadcast::Sender<PoolEvent>,
}

impl RelayPool {
    /// Create a new relay pool.
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    pub fn with_config(config: RelayConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1000);
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            subscriptions: Arc::new(SubscriptionManager::new()),
            events_tx,
        }
    }

    /// Subscribe to pool events.
    pub fn notifications(&self) -> broadcast::Receiver<PoolEvent> {
        self.events_tx.subscribe()
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Add a relay and start connecting to it in the background.
    ///
    /// Adding a relay that is already in the pool does nothing.
    pub async fn add_relay(&self, url: &str) -> Result<()> {
        let mut conns = self.connections.write().await;
        if conns.contains_key(url) {
            return Ok(());
        }

        let conn = RelayConnection::new(
            url,
            self.config.clone(),
            self.subscriptions.clone(),
            self.events_tx.clone(),
        )?;
        conn.start();
        info!(relay = url, "added relay to pool");
        conns.insert(url.to_string(), Arc::new(conn));
        Ok(())
    }

    /// Remove a relay from the pool. Returns whether it was present.
    pub async fn remove_relay(&self, url: &str) -> bool {
        let conn = self.connections.write().await.remove(url);
        match conn {
            Some(conn) => {
                conn.disconnect();
                self.subscriptions.detach_relay(url);
                info!(relay = url, "removed relay from pool");
                true
            }
            None => false,
        }
    }

    /// Add every URL and wait for each first connection attempt.
    ///
    /// URLs are handled concurrently; one slow or failing relay does not
    /// hold up the rest. Failed relays stay in the pool and keep retrying.
    pub async fn connect(&self, urls: &[String]) -> Vec<(String, Result<()>)> {
        let mut results = Vec::new();
        let mut pending = Vec::new();

        for url in urls {
            match self.add_relay(url).await {
                Ok(()) => {
                    if let Some(conn) = self.connections.read().await.get(url) {
                        pending.push(conn.clone());
                    }
                }
                Err(e) => {
                    warn!(relay = %url, error = %e, "rejected relay");
                    results.push((url.clone(), Err(e)));
                }
            }
        }

        let wait = self.config.connect_timeout + Duration::from_secs(1);
        let attempts = join_all(pending.into_iter().map(|conn| async move {
            let outcome = conn.wait_connected(wait).await;
            (conn.url().to_string(), outcome)
        }))
        .await;
        results.extend(attempts);
        results
    }

    /// Get all relay URLs in the pool.
    pub async fn relay_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.connections.read().await.keys().cloned().collect();
        urls.sort();
        urls
    }

    pub async fn relay_statuses(&self) -> Vec<RelayStatus> {
        let mut statuses: Vec<RelayStatus> = self
            .connections
            .read()
            .await
            .values()
            .map(|conn| conn.status())
            .collect();
        statuses.sort_by(|a, b| a.url.cmp(&b.url));
        statuses
    }

    pub async fn connected_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.is_connected())
            .count()
    }

    /// Check if a relay is connected.
    pub async fn is_connected(&self, url: &str) -> bool {
        self.connections
            .read()
            .await
            .get(url)
            .is_some_and(|conn| conn.is_connected())
    }

    /// Send `event` to every connected relay.
    ///
    /// Succeeds when at least one relay took the event. Relay acknowledgements
    /// arrive later as [`PoolEvent::Ok`].
    pub async fn publish(&self, event: &Event) -> Result<PublishReport> {
        let message = ClientMessage::Event(event.clone());
        let mut report = PublishReport {
            event_id: event.id.clone(),
            ..Default::default()
        };

        for (url, conn) in self.connections.read().await.iter() {
            if !conn.is_connected() {
                report.failed.push((url.clone(), "not connected".to_string()));
                continue;
            }
            match conn.send(&message) {
                Ok(()) => report.sent_to.push(url.clone()),
                Err(e) => report.failed.push((url.clone(), e.to_string())),
            }
        }
        report.sent_to.sort();

        if !report.is_success() {
            return Err(ClientError::PublishFailed(format!(
                "no connected relay took event {}",
                event.short_id()
            )));
        }
        debug!(event = %event.id, kind = event.kind, relays = report.sent_to.len(), "published");
        Ok(report)
    }

    /// Subscribe on every relay with callbacks. Returns the generated id.
    ///
    /// `on_eose` fires once for each relay that finishes its replay.
    pub async fn subscribe(
        &self,
        filters: Vec<Filter>,
        on_event: EventCallback,
        on_eose: Option<EoseCallback>,
    ) -> Result<String> {
        let id = generate_subscription_id();
        self.subscribe_with_id(&id, filters, SubscriptionSink::callbacks(on_event, on_eose))
            .await?;
        Ok(id)
    }

    /// Subscribe on every relay, delivering into a channel.
    pub async fn subscribe_channel(
        &self,
        filters: Vec<Filter>,
    ) -> Result<(String, mpsc::UnboundedReceiver<SubscriptionItem>)> {
        let id = generate_subscription_id();
        let (sink, rx) = SubscriptionSink::channel();
        self.subscribe_with_id(&id, filters, sink).await?;
        Ok((id, rx))
    }

    /// Register `id` and send the REQ to every relay with a live session.
    ///
    /// A relay whose session has not started yet replays the subscription
    /// once it does. A session that starts while this runs may see the REQ
    /// twice, which relays treat as a replacement.
    pub async fn subscribe_with_id(
        &self,
        id: &str,
        filters: Vec<Filter>,
        sink: SubscriptionSink,
    ) -> Result<()> {
        self.subscriptions.open(id, filters.clone(), sink)?;

        let req = ClientMessage::Req {
            subscription_id: id.to_string(),
            filters,
        };
        for (url, conn) in self.connections.read().await.iter() {
            self.subscriptions.attach_relay(id, url);
            if let Err(e) = conn.send(&req) {
                self.subscriptions.release_relay(id, url);
                debug!(relay = %url, sub = id, error = %e, "REQ not sent");
            }
        }
        debug!(sub = id, "subscribed");
        Ok(())
    }

    /// Close a subscription everywhere.
    ///
    /// The id is released first, so frames still in flight are dropped.
    pub async fn unsubscribe(&self, id: &str) -> Result<()> {
        if !self.subscriptions.close(id) {
            return Err(ClientError::Subscription(format!(
                "unknown subscription: {id}"
            )));
        }

        let close = ClientMessage::Close {
            subscription_id: id.to_string(),
        };
        for conn in self.connections.read().await.values() {
            let _ = conn.send(&close);
        }
        debug!(sub = id, "unsubscribed");
        Ok(())
    }

    /// One-shot fan-in: collect stored events from every connected relay.
    ///
    /// Returns when all relays sent EOSE or `wait` elapses, whichever comes
    /// first. Events are de-duplicated by id and kept in arrival order.
    pub async fn query(&self, filters: Vec<Filter>, wait: Duration) -> Result<Vec<Event>> {
        let (id, mut rx) = self.subscribe_channel(filters).await?;

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let reached_any = self
            .subscriptions
            .tracker(&id)
            .is_some_and(|tracker| !tracker.relays.is_empty());

        if reached_any {
            let deadline = tokio::time::sleep(wait);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    item = rx.recv() => match item {
                        Some(SubscriptionItem::Event { event, .. }) => {
                            if seen.insert(event.id.clone()) {
                                events.push(event);
                            }
                        }
                        Some(SubscriptionItem::Eose { all_eose: true, .. }) | None => break,
                        Some(SubscriptionItem::Eose { .. }) => {}
                    },
                    _ = &mut deadline => {
                        debug!(sub = %id, "query timed out before all relays sent EOSE");
                        break;
                    }
                }
            }
        }

        let _ = self.unsubscribe(&id).await;
        Ok(events)
    }

    /// Disconnect from all relays. They stay in the pool.
    pub async fn disconnect_all(&self) {
        for conn in self.connections.read().await.values() {
            conn.disconnect();
        }
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new()
    }
}

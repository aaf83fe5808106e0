//! Logical subscriptions spanning every relay in a pool.
//!
//! Each connection's read loop hands its frames to the shared
//! [`SubscriptionManager`], which routes them to the subscription's sink by id.
//! A subscription outlives any single connection: reconnecting relays re-issue
//! whatever is still registered here, and closing a subscription removes it for
//! all of them at once. Frames for ids that are no longer registered are
//! dropped, and the relay that sent them is asked to CLOSE the id.

use crate::error::{ClientError, Result};
use crate::message::{Filter, RelayMessage};
use nostr::Event;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Generate a unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Called with the relay URL and each matching event.
pub type EventCallback = Arc<dyn Fn(&str, &Event) + Send + Sync>;

/// Called with the relay URL once that relay has replayed its stored events.
pub type EoseCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Item delivered to a channel-backed subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionItem {
    Event {
        relay_url: String,
        event: Event,
    },
    Eose {
        relay_url: String,
        /// Every relay the subscription was sent to has now sent EOSE
        all_eose: bool,
    },
}

/// Where a subscription's events go.
#[derive(Clone)]
pub enum SubscriptionSink {
    Callbacks {
        on_event: EventCallback,
        on_eose: Option<EoseCallback>,
    },
    Channel(mpsc::UnboundedSender<SubscriptionItem>),
}

impl SubscriptionSink {
    pub fn callbacks(on_event: EventCallback, on_eose: Option<EoseCallback>) -> Self {
        Self::Callbacks { on_event, on_eose }
    }

    /// Channel sink plus the receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SubscriptionItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::Channel(tx), rx)
    }

    /// Returns false once a channel receiver is gone.
    fn deliver_event(&self, relay_url: &str, event: Event) -> bool {
        match self {
            Self::Callbacks { on_event, .. } => {
                on_event(relay_url, &event);
                true
            }
            Self::Channel(tx) => tx
                .send(SubscriptionItem::Event {
                    relay_url: relay_url.to_string(),
                    event,
                })
                .is_ok(),
        }
    }

    fn deliver_eose(&self, relay_url: &str, all_eose: bool) -> bool {
        match self {
            Self::Callbacks { on_eose, .. } => {
                if let Some(on_eose) = on_eose {
                    on_eose(relay_url);
                }
                true
            }
            Self::Channel(tx) => tx
                .send(SubscriptionItem::Eose {
                    relay_url: relay_url.to_string(),
                    all_eose,
                })
                .is_ok(),
        }
    }
}

impl fmt::Debug for SubscriptionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callbacks { .. } => f.write_str("SubscriptionSink::Callbacks"),
            Self::Channel(_) => f.write_str("SubscriptionSink::Channel"),
        }
    }
}

/// Tracks which relays have a specific subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionTracker {
    pub id: String,
    pub filters: Vec<Filter>,
    /// Relays that were sent the REQ
    pub relays: HashSet<String>,
    /// Relays that have sent EOSE
    pub eose_relays: HashSet<String>,
}

impl SubscriptionTracker {
    pub fn new(id: impl Into<String>, filters: Vec<Filter>) -> Self {
        Self {
            id: id.into(),
            filters,
            relays: HashSet::new(),
            eose_relays: HashSet::new(),
        }
    }

    pub fn add_relay(&mut self, relay_url: impl Into<String>) {
        self.relays.insert(relay_url.into());
    }

    pub fn remove_relay(&mut self, relay_url: &str) {
        self.relays.remove(relay_url);
        self.eose_relays.remove(relay_url);
    }

    /// Records EOSE; true only the first time this relay reports it.
    pub fn mark_eose(&mut self, relay_url: &str) -> bool {
        self.eose_relays.insert(relay_url.to_string())
    }

    pub fn all_eose(&self) -> bool {
        !self.relays.is_empty() && self.relays.iter().all(|r| self.eose_relays.contains(r))
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.filters.iter().any(|filter| filter.matches(event))
    }
}

struct Entry {
    tracker: SubscriptionTracker,
    sink: SubscriptionSink,
}

/// What [`SubscriptionManager::dispatch`] did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// Event outside the subscription's filters, or a repeated EOSE
    Dropped,
    /// Frame for a subscription the pool no longer holds; the sending relay
    /// should be told to CLOSE it
    Orphaned(String),
    /// Not a subscription frame
    Ignored,
}

/// Registry of the pool's logical subscriptions.
#[derive(Default)]
pub struct SubscriptionManager {
    entries: RwLock<HashMap<String, Entry>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription. Ids must be unique among open subscriptions.
    pub fn open(&self, id: &str, filters: Vec<Filter>, sink: SubscriptionSink) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(id) {
            return Err(ClientError::Subscription(format!(
                "subscription id already in use: {id}"
            )));
        }
        entries.insert(
            id.to_string(),
            Entry {
                tracker: SubscriptionTracker::new(id, filters),
                sink,
            },
        );
        Ok(())
    }

    /// Forget a subscription. Returns whether it was open.
    pub fn close(&self, id: &str) -> bool {
        self.entries.write().remove(id).is_some()
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Ids and filters of every open subscription, for re-issuing after a reconnect.
    pub fn open_subscriptions(&self) -> Vec<(String, Vec<Filter>)> {
        self.entries
            .read()
            .values()
            .map(|entry| (entry.tracker.id.clone(), entry.tracker.filters.clone()))
            .collect()
    }

    pub fn filters(&self, id: &str) -> Option<Vec<Filter>> {
        self.entries
            .read()
            .get(id)
            .map(|entry| entry.tracker.filters.clone())
    }

    pub fn tracker(&self, id: &str) -> Option<SubscriptionTracker> {
        self.entries.read().get(id).map(|entry| entry.tracker.clone())
    }

    /// Note that `relay_url` was sent the REQ for `id`.
    ///
    /// A fresh REQ restarts stored-event replay, so a previous EOSE from the
    /// same relay no longer counts.
    pub fn attach_relay(&self, id: &str, relay_url: &str) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.tracker.add_relay(relay_url);
            entry.tracker.eose_relays.remove(relay_url);
        }
    }

    /// Undo [`attach_relay`](Self::attach_relay) when the REQ never went out.
    pub fn release_relay(&self, id: &str, relay_url: &str) {
        if let Some(entry) = self.entries.write().get_mut(id) {
            entry.tracker.remove_relay(relay_url);
        }
    }

    /// Drop `relay_url` from every subscription, e.g. when it leaves the pool.
    pub fn detach_relay(&self, relay_url: &str) {
        for entry in self.entries.write().values_mut() {
            entry.tracker.remove_relay(relay_url);
        }
    }

    /// Route one inbound frame from `relay_url`.
    ///
    /// Sinks run after the registry lock is released, so a callback may
    /// close its own subscription.
    pub fn dispatch(&self, relay_url: &str, message: RelayMessage) -> Dispatch {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                let sink = {
                    let entries = self.entries.read();
                    let Some(entry) = entries.get(&subscription_id) else {
                        trace!(relay = relay_url, sub = %subscription_id, "event for closed subscription");
                        return Dispatch::Orphaned(subscription_id);
                    };
                    if !entry.tracker.matches(&event) {
                        debug!(relay = relay_url, sub = %subscription_id, event = %event.id, "dropping event outside subscription filters");
                        return Dispatch::Dropped;
                    }
                    entry.sink.clone()
                };

                if !sink.deliver_event(relay_url, event) {
                    self.close_abandoned(&subscription_id);
                    return Dispatch::Orphaned(subscription_id);
                }
                Dispatch::Delivered
            }
            RelayMessage::Eose { subscription_id } => {
                let (sink, all_eose) = {
                    let mut entries = self.entries.write();
                    let Some(entry) = entries.get_mut(&subscription_id) else {
                        trace!(relay = relay_url, sub = %subscription_id, "EOSE for closed subscription");
                        return Dispatch::Orphaned(subscription_id);
                    };
                    if !entry.tracker.mark_eose(relay_url) {
                        return Dispatch::Dropped;
                    }
                    (entry.sink.clone(), entry.tracker.all_eose())
                };

                if !sink.deliver_eose(relay_url, all_eose) {
                    self.close_abandoned(&subscription_id);
                    return Dispatch::Orphaned(subscription_id);
                }
                Dispatch::Delivered
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                let mut entries = self.entries.write();
                match entries.get_mut(&subscription_id) {
                    Some(entry) => {
                        warn!(relay = relay_url, sub = %subscription_id, %message, "relay closed subscription");
                        entry.tracker.remove_relay(relay_url);
                        Dispatch::Delivered
                    }
                    None => Dispatch::Dropped,
                }
            }
            _ => Dispatch::Ignored,
        }
    }

    fn close_abandoned(&self, id: &str) {
        if self.close(id) {
            debug!(sub = id, "subscription receiver dropped, closing");
        }
    }
}

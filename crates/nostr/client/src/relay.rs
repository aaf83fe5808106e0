//! Single relay connection management
//!
//! A [`RelayConnection`] owns one supervised WebSocket session. The supervisor
//! task connects, runs the read/write loop until the socket drops, then waits
//! out an exponential backoff and tries again for as long as the connection
//! lives. Every reconnect re-issues REQ for the subscriptions still registered
//! in the shared [`SubscriptionManager`].

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, RelayMessage};
use crate::pool::PoolEvent;
use crate::recovery::ExponentialBackoff;
use crate::subscription::{Dispatch, SubscriptionManager};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or stopped by the owner
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Connected and ready
    Connected,
    /// Waiting before the next reconnect attempt
    Backoff,
}

/// Relay connection configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Initial reconnection delay
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    /// Ping interval for keeping idle sockets alive
    pub ping_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of one endpoint.
#[derive(Debug, Clone)]
pub struct RelayStatus {
    pub url: String,
    pub state: ConnectionState,
    /// Failed attempts since the last successful connect
    pub retry_count: u32,
    pub last_activity: Option<Instant>,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Shared {
    url: String,
    config: RelayConfig,
    state_tx: watch::Sender<ConnectionState>,
    retry_count: AtomicU32,
    last_activity: Mutex<Option<Instant>>,
    /// Writer half of the live session, if any
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    subscriptions: Arc<SubscriptionManager>,
    events_tx: broadcast::Sender<PoolEvent>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn touch(&self) {
        *self.last_activity.lock() = Some(Instant::now());
    }

    fn notify(&self, event: PoolEvent) {
        // No receivers is fine
        let _ = self.events_tx.send(event);
    }

    fn handle_text(&self, text: &str) {
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(relay = %self.url, error = %e, "ignoring malformed frame");
                return;
            }
        };

        match message {
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                if success {
                    trace!(relay = %self.url, event = %event_id, "event accepted");
                } else {
                    warn!(relay = %self.url, event = %event_id, %message, "event rejected");
                }
                self.notify(PoolEvent::Ok {
                    relay_url: self.url.clone(),
                    event_id,
                    success,
                    message,
                });
            }
            RelayMessage::Notice { message } => {
                info!(relay = %self.url, %message, "relay notice");
                self.notify(PoolEvent::Notice {
                    relay_url: self.url.clone(),
                    message,
                });
            }
            RelayMessage::Auth { .. } => {
                debug!(relay = %self.url, "ignoring AUTH challenge");
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                self.subscriptions.dispatch(
                    &self.url,
                    RelayMessage::Closed {
                        subscription_id: subscription_id.clone(),
                        message: message.clone(),
                    },
                );
                self.notify(PoolEvent::Closed {
                    relay_url: self.url.clone(),
                    subscription_id,
                    message,
                });
            }
            other => {
                if let Dispatch::Orphaned(subscription_id) =
                    self.subscriptions.dispatch(&self.url, other)
                {
                    self.close_orphan(subscription_id);
                }
            }
        }
    }

    /// Ask the relay to stop feeding a subscription nobody reads any more.
    fn close_orphan(&self, subscription_id: String) {
        let close = ClientMessage::Close { subscription_id };
        let json = match close.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(relay = %self.url, error = %e, "could not encode CLOSE");
                return;
            }
        };
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(Message::text(json));
            debug!(relay = %self.url, "sent CLOSE for orphaned subscription");
        }
    }
}

/// Relay connection
pub struct RelayConnection {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayConnection {
    /// Create a connection for `url`. Nothing happens on the network until
    /// [`start`](Self::start).
    pub fn new(
        url: &str,
        config: RelayConfig,
        subscriptions: Arc<SubscriptionManager>,
        events_tx: broadcast::Sender<PoolEvent>,
    ) -> Result<Self> {
        let parsed = Url::parse(url)?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidUrl(format!(
                "expected ws:// or wss://, got {url}"
            )));
        }

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            shared: Arc::new(Shared {
                url: url.to_string(),
                config,
                state_tx,
                retry_count: AtomicU32::new(0),
                last_activity: Mutex::new(None),
                outbound: Mutex::new(None),
                subscriptions,
                events_tx,
            }),
            task: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            url: self.shared.url.clone(),
            state: self.state(),
            retry_count: self.shared.retry_count.load(Ordering::Relaxed),
            last_activity: *self.shared.last_activity.lock(),
        }
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Spawn the supervisor. Calling this while it runs is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        self.shared.set_state(ConnectionState::Connecting);
        let shared = self.shared.clone();
        *task = Some(tokio::spawn(supervise(shared)));
    }

    /// Wait until the current attempt either connects or fails.
    pub async fn wait_connected(&self, wait: Duration) -> Result<()> {
        let mut states = self.state_changes();
        let reached = timeout(wait, async {
            states
                .wait_for(|state| {
                    matches!(state, ConnectionState::Connected | ConnectionState::Backoff)
                })
                .await
                .map(|state| *state)
        })
        .await;

        match reached {
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(Ok(_)) => Err(ClientError::Connection(format!(
                "could not connect to {}",
                self.shared.url
            ))),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => Err(ClientError::Timeout(format!(
                "connecting to {} took longer than {:?}",
                self.shared.url, wait
            ))),
        }
    }

    /// Queue a frame on the live session.
    pub fn send(&self, message: &ClientMessage) -> Result<()> {
        let json = message.to_json()?;
        let outbound = self.shared.outbound.lock();
        let tx = outbound.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(Message::text(json))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Stop the supervisor and drop the socket.
    pub fn disconnect(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.shared.outbound.lock().take();
        let was_connected = self.is_connected();
        self.shared.set_state(ConnectionState::Disconnected);
        if was_connected {
            self.shared.notify(PoolEvent::Disconnected {
                relay_url: self.shared.url.clone(),
            });
        }
        info!(relay = %self.shared.url, "disconnected");
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

async fn supervise(shared: Arc<Shared>) {
    let mut backoff = ExponentialBackoff::new(
        shared.config.reconnect_delay,
        shared.config.max_reconnect_delay,
    );

    loop {
        shared.set_state(ConnectionState::Connecting);
        debug!(relay = %shared.url, "connecting");

        match timeout(shared.config.connect_timeout, connect_async(shared.url.as_str())).await {
            Ok(Ok((ws, _response))) => {
                backoff.reset();
                shared.retry_count.store(0, Ordering::Relaxed);
                shared.touch();
                info!(relay = %shared.url, "connected");

                let reason = run_session(&shared, ws).await;
                shared.outbound.lock().take();
                shared.subscriptions.detach_relay(&shared.url);
                warn!(relay = %shared.url, %reason, "connection lost");
                shared.notify(PoolEvent::Disconnected {
                    relay_url: shared.url.clone(),
                });
            }
            Ok(Err(e)) => {
                warn!(relay = %shared.url, error = %e, "connect failed");
            }
            Err(_) => {
                warn!(relay = %shared.url, timeout = ?shared.config.connect_timeout, "connect timed out");
            }
        }

        let delay = backoff.next_delay();
        let retries = shared.retry_count.fetch_add(1, Ordering::Relaxed) + 1;
        shared.set_state(ConnectionState::Backoff);
        debug!(relay = %shared.url, ?delay, retries, "reconnecting after backoff");
        tokio::time::sleep(delay).await;
    }
}

/// Runs one socket until it fails; returns why it ended.
async fn run_session(shared: &Shared, ws: WsStream) -> String {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    // Publish the writer before reading the subscription list so a concurrent
    // subscribe either reaches this session directly or is in the list.
    *shared.outbound.lock() = Some(out_tx.clone());

    for (subscription_id, filters) in shared.subscriptions.open_subscriptions() {
        let req = ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters,
        };
        match req.to_json() {
            Ok(json) => {
                shared.subscriptions.attach_relay(&subscription_id, &shared.url);
                let _ = out_tx.send(Message::text(json));
                debug!(relay = %shared.url, sub = %subscription_id, "re-issued subscription");
            }
            Err(e) => warn!(relay = %shared.url, sub = %subscription_id, error = %e, "could not encode REQ"),
        }
    }

    shared.set_state(ConnectionState::Connected);
    shared.notify(PoolEvent::Connected {
        relay_url: shared.url.clone(),
    });

    let mut ping = tokio::time::interval(shared.config.ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    shared.touch();
                    shared.handle_text(text.as_str());
                }
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => format!("closed by relay: {}", frame.reason.as_str()),
                        None => "closed by relay".to_string(),
                    };
                }
                Some(Ok(_)) => shared.touch(),
                Some(Err(e)) => return e.to_string(),
                None => return "stream ended".to_string(),
            },
            outgoing = out_rx.recv() => {
                let Some(message) = outgoing else {
                    return "writer dropped".to_string();
                };
                if let Err(e) = sink.send(message).await {
                    return e.to_string();
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    return e.to_string();
                }
            }
        }
    }
}

//! In-process relay for tests.
//!
//! [`MockRelay`] speaks enough NIP-01 to exercise the pool: it stores every
//! EVENT, answers with OK, replays stored events for a REQ followed by EOSE,
//! and forwards new events to matching live subscriptions. It listens on an
//! ephemeral localhost port.

use crate::message::Filter;
use futures::{SinkExt, StreamExt};
use nostr::Event;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, warn};

struct MockState {
    events: Mutex<Vec<Event>>,
    broadcast_tx: broadcast::Sender<Event>,
    connections: Mutex<Vec<JoinHandle<()>>>,
    reqs: AtomicUsize,
    closes: AtomicUsize,
}

impl MockState {
    fn store(&self, event: Event) {
        self.events.lock().push(event.clone());
        let _ = self.broadcast_tx.send(event);
    }
}

/// Local NIP-01 relay.
pub struct MockRelay {
    addr: SocketAddr,
    state: Arc<MockState>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl MockRelay {
    /// Bind to `127.0.0.1:0` and start accepting.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (broadcast_tx, _) = broadcast::channel(256);
        let state = Arc::new(MockState {
            events: Mutex::new(Vec::new()),
            broadcast_tx,
            connections: Mutex::new(Vec::new()),
            reqs: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let conn_state = accept_state.clone();
                let handle = tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, conn_state).await {
                        debug!(%peer, error = %e, "mock relay connection ended");
                    }
                });
                accept_state.connections.lock().push(handle);
            }
        });

        Ok(Self {
            addr,
            state,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Every event received or injected so far.
    pub fn events(&self) -> Vec<Event> {
        self.state.events.lock().clone()
    }

    pub fn events_of_kind(&self, kind: u16) -> Vec<Event> {
        self.state
            .events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of REQ frames received over the relay's lifetime.
    pub fn req_count(&self) -> usize {
        self.state.reqs.load(Ordering::SeqCst)
    }

    /// Number of CLOSE frames received over the relay's lifetime.
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Store an event as if another client had published it.
    pub fn inject(&self, event: Event) {
        self.state.store(event);
    }

    /// Poll until at least `count` events of `kind` are stored.
    pub async fn wait_for_events(&self, kind: u16, count: usize, wait: Duration) -> Vec<Event> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let found = self.events_of_kind(kind);
            if found.len() >= count || tokio::time::Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Drop every client socket but keep listening.
    pub fn drop_connections(&self) {
        for handle in self.state.connections.lock().drain(..) {
            handle.abort();
        }
    }

    /// Stop listening and drop every client socket.
    pub fn shutdown(&self) {
        if let Some(handle) = self.accept_task.lock().take() {
            handle.abort();
        }
        self.drop_connections();
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockState>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws = accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let mut subscriptions: HashMap<String, Vec<Filter>> = HashMap::new();
    let mut broadcast_rx = state.broadcast_tx.subscribe();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    for reply in handle_frame(text.as_str(), &state, &mut subscriptions) {
                        write.send(Message::text(reply.to_string())).await?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
            },
            event = broadcast_rx.recv() => match event {
                Ok(event) => {
                    for (id, filters) in &subscriptions {
                        if filters.iter().any(|filter| filter.matches(&event)) {
                            write.send(Message::text(json!(["EVENT", id, event]).to_string())).await?;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "mock relay broadcast lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

fn handle_frame(
    text: &str,
    state: &MockState,
    subscriptions: &mut HashMap<String, Vec<Filter>>,
) -> Vec<Value> {
    let Ok(Value::Array(frame)) = serde_json::from_str::<Value>(text) else {
        return vec![json!(["NOTICE", "invalid: expected a JSON array"])];
    };

    match frame.first().and_then(Value::as_str) {
        Some("EVENT") => {
            let Some(Ok(event)) = frame.get(1).cloned().map(serde_json::from_value::<Event>) else {
                return vec![json!(["NOTICE", "invalid: bad event"])];
            };
            let id = event.id.clone();
            state.store(event);
            vec![json!(["OK", id, true, ""])]
        }
        Some("REQ") => {
            let Some(id) = frame.get(1).and_then(Value::as_str) else {
                return vec![json!(["NOTICE", "invalid: missing subscription id"])];
            };
            let filters: Vec<Filter> = frame[2..]
                .iter()
                .filter_map(|raw| serde_json::from_value(raw.clone()).ok())
                .collect();
            state.reqs.fetch_add(1, Ordering::SeqCst);

            let mut replies: Vec<Value> = state
                .events
                .lock()
                .iter()
                .filter(|event| filters.iter().any(|filter| filter.matches(event)))
                .map(|event| json!(["EVENT", id, event]))
                .collect();
            replies.push(json!(["EOSE", id]));
            subscriptions.insert(id.to_string(), filters);
            replies
        }
        Some("CLOSE") => {
            if let Some(id) = frame.get(1).and_then(Value::as_str) {
                subscriptions.remove(id);
            }
            state.closes.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        }
        _ => vec![json!(["NOTICE", "unsupported command"])],
    }
}

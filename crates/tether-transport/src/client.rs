//! Request/response multiplexing over a single link.

use crate::connection::{ConnectionManager, ConnectionState, ConnectionStats};
use crate::framing::Framing;
use crate::message::{Event, Inbound, Request, Response};
use crate::traits::{Link, TransportError};
use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 64;

type Responder = oneshot::Sender<Result<Response, TransportError>>;

/// Notification from the transport to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Unsolicited message from the companion.
    Event(Event),
    /// The connection dropped. Sent once per connection.
    Disconnected { message: Option<String> },
}

struct Shared {
    pending: DashMap<String, Responder>,
    connection: ConnectionManager,
    events: broadcast::Sender<TransportEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn dispatch(&self, bytes: &[u8]) {
        let inbound = match Inbound::classify(bytes) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed companion message");
                return;
            }
        };

        match inbound {
            Inbound::Reply { id, body } => {
                if let Some((_, responder)) = self.pending.remove(&id) {
                    let reply = serde_json::from_value::<Response>(body).map_err(TransportError::from);
                    // Receiver may have timed out already.
                    let _ = responder.send(reply);
                } else if body.get("event").is_some() {
                    match serde_json::from_value::<Event>(body) {
                        Ok(event) => self.emit(TransportEvent::Event(event)),
                        Err(e) => tracing::warn!(error = %e, "Dropping malformed event"),
                    }
                } else {
                    tracing::debug!(request_id = %id, "Dropping response with no pending request");
                }
            }
            Inbound::Event(event) => self.emit(TransportEvent::Event(event)),
            Inbound::Unroutable => {
                tracing::debug!("Dropping unroutable companion message");
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Tear down the current connection. Only the first call per connection
    /// rejects pending requests and emits the notification.
    fn handle_disconnect(&self, message: Option<String>) {
        if self.connection.transition(ConnectionState::Disconnected) != ConnectionState::Connected {
            return;
        }

        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let rejected = ids.len();
        for id in ids {
            if let Some((_, responder)) = self.pending.remove(&id) {
                let _ = responder.send(Err(TransportError::Disconnected));
            }
        }

        tracing::info!(rejected, reason = ?message, "Companion link disconnected");
        self.emit(TransportEvent::Disconnected { message });
    }
}

/// Removes a pending entry when the waiting call finishes, however it finishes.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, Responder>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Owns one connection to the companion and correlates requests with responses.
pub struct RequestClient {
    link: Arc<dyn Link>,
    framing: Arc<dyn Framing>,
    shared: Arc<Shared>,
    connect_lock: tokio::sync::Mutex<()>,
    id_prefix: String,
    next_id: AtomicU64,
}

impl RequestClient {
    pub fn new(link: Arc<dyn Link>, framing: Arc<dyn Framing>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            link,
            framing,
            shared: Arc::new(Shared {
                pending: DashMap::new(),
                connection: ConnectionManager::new(),
                events,
                reader: Mutex::new(None),
            }),
            connect_lock: tokio::sync::Mutex::new(()),
            id_prefix: format!("{:08x}", rand::random::<u32>()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to events and disconnect notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connection.is_connected()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared.connection.stats()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Connect if not already connected.
    pub async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        self.shared.connection.transition(ConnectionState::Connecting);
        if let Err(e) = self.link.connect().await {
            self.shared.connection.transition(ConnectionState::Disconnected);
            tracing::warn!(error = %e, "Failed to connect to companion");
            return Err(e);
        }
        self.shared.connection.transition(ConnectionState::Connected);

        let reader = tokio::spawn(read_loop(
            self.link.clone(),
            self.framing.clone(),
            self.shared.clone(),
        ));
        *self.shared.reader.lock() = Some(reader);

        tracing::debug!(id_prefix = %self.id_prefix, "Connected to companion");
        Ok(())
    }

    /// Send a command and wait for its correlated response.
    ///
    /// A response with `ok: false` is still `Ok` here; use
    /// [`Response::into_result`] to get at the remote error.
    pub async fn send_request(
        &self,
        command: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        self.connect().await?;

        let id = format!(
            "{}-{}",
            self.id_prefix,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );
        let request = Request {
            id: id.clone(),
            command: command.to_owned(),
            params,
        };
        let frame = self.framing.wrap(&serde_json::to_vec(&request)?)?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id.clone(), tx);
        let _pending = PendingGuard {
            pending: &self.shared.pending,
            id: &id,
        };

        if let Err(e) = self.link.send(&frame).await {
            tracing::warn!(command, error = %e, "Write to companion failed");
            self.shared.handle_disconnect(Some(e.to_string()));
            return Err(TransportError::Disconnected);
        }
        self.shared.connection.record_sent(frame.len() as u64);
        tracing::trace!(command, request_id = %id, "Request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                tracing::debug!(command, request_id = %id, ?timeout, "Request timed out");
                Err(TransportError::Timeout)
            }
        }
    }

    /// Close the link and reject everything still pending.
    pub async fn disconnect(&self) {
        if let Some(reader) = self.shared.reader.lock().take() {
            reader.abort();
        }
        if let Err(e) = self.link.close().await {
            tracing::debug!(error = %e, "Error closing companion link");
        }
        self.shared.handle_disconnect(None);
    }
}

impl Drop for RequestClient {
    fn drop(&mut self) {
        if let Some(reader) = self.shared.reader.lock().take() {
            reader.abort();
        }
    }
}

async fn read_loop(link: Arc<dyn Link>, framing: Arc<dyn Framing>, shared: Arc<Shared>) {
    let mut buf = BytesMut::new();
    let reason = 'read: loop {
        match link.recv().await {
            Ok(Some(chunk)) => {
                shared.connection.record_received(chunk.len() as u64);
                buf.extend_from_slice(&chunk);
                loop {
                    match framing.unwrap(&mut buf) {
                        Ok(Some(message)) => shared.dispatch(&message),
                        Ok(None) => break,
                        Err(e) => break 'read Some(e.to_string()),
                    }
                }
            }
            Ok(None) => break None,
            Err(e) => break Some(e.to_string()),
        }
    };
    // handle_disconnect aborts this task's own handle; drop it first so the
    // abort is a no-op.
    shared.reader.lock().take();
    shared.handle_disconnect(reason);
}

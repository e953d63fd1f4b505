// WebSocket event client: one socket, a subscription set, and a
// background reader that reconnects and replays subscriptions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use super::event::{Event, EventDataRegistry};
use super::selector::EventSelector;
use crate::auth::ApiKeys;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Production event endpoint.
pub const DEFAULT_EVENT_URL: &str = "wss://event.wifiplug.co.uk/v1.0";

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── ClientEvent ──────────────────────────────────────────────────────

/// Notifications published by an [`EventClient`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A socket was opened.
    Connected,
    /// The socket was lost or closed.
    Disconnected,
    /// An event arrived for one of the active subscriptions.
    Received(Arc<Event>),
}

// ── EventClientConfig ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EventClientConfig {
    /// Event endpoint; credentials are appended as query parameters.
    pub url: String,
    /// Wait between failed reconnect attempts. Default: 5s.
    pub reconnect_delay: Duration,
    /// Reconnect after the socket drops. Default: true.
    pub auto_reconnect: bool,
}

impl Default for EventClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_EVENT_URL.to_owned(),
            reconnect_delay: Duration::from_secs(5),
            auto_reconnect: true,
        }
    }
}

// ── Wire format ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct OutgoingMessage<'a> {
    #[serde(rename = "Type")]
    kind: &'static str,
    #[serde(rename = "Payload")]
    payload: SelectorPayload<'a>,
    #[serde(rename = "MessageID")]
    message_id: Uuid,
}

#[derive(Serialize)]
struct SelectorPayload<'a> {
    #[serde(rename = "Selector")]
    selector: &'a str,
}

/// Why an inbound frame ended the read loop.
#[derive(Debug)]
pub(crate) struct MalformedFrame(String);

/// Decode one inbound message.
///
/// Returns `Ok(None)` for well-formed frames of a type this client does
/// not handle.
pub(crate) fn decode_frame(
    raw: &[u8],
    registry: &EventDataRegistry,
) -> Result<Option<Event>, MalformedFrame> {
    let message: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| MalformedFrame(format!("invalid JSON: {e}")))?;

    let Some(kind) = message.get("Type").and_then(serde_json::Value::as_str) else {
        return Err(MalformedFrame("Type is missing or not a string".into()));
    };
    let Some(data) = message.get("Data").filter(|d| d.is_object()) else {
        return Err(MalformedFrame("Data is missing or not an object".into()));
    };

    if !kind.eq_ignore_ascii_case("Event") {
        tracing::debug!(frame_type = kind, "Ignoring unhandled frame type");
        return Ok(None);
    }

    let mut event = Event::deserialize(data)
        .map_err(|e| MalformedFrame(format!("invalid event: {e}")))?;
    registry.resolve(&mut event);
    Ok(Some(event))
}

// ── Shared state ─────────────────────────────────────────────────────

/// Write half of the live socket, tagged with the connection it belongs to.
struct Connection {
    epoch: u64,
    sink: WsSink,
}

impl Connection {
    async fn send(&mut self, kind: &'static str, selector: &str) -> Result<(), Error> {
        let text = serde_json::to_string(&OutgoingMessage {
            kind,
            payload: SelectorPayload { selector },
            message_id: Uuid::new_v4(),
        })?;
        self.sink
            .send(Message::text(text))
            .await
            .map_err(|e| Error::WebSocketSend(e.to_string()))
    }
}

struct Inner {
    config: EventClientConfig,
    api_keys: ApiKeys,
    registry: EventDataRegistry,
    scope: std::sync::Mutex<Option<String>>,

    /// Serializes connection attempts.
    connect_lock: Mutex<()>,
    /// The send lock. `None` while disconnected.
    connection: Mutex<Option<Connection>>,
    /// The subscription lock, always taken before the send lock.
    subscriptions: Mutex<Vec<String>>,

    epoch: AtomicU64,
    auto_reconnect: AtomicBool,
    reset: AtomicBool,
    closing: Notify,
    events_tx: broadcast::Sender<ClientEvent>,
}

impl Inner {
    fn connect_url(&self) -> Result<Url, Error> {
        let mut url = Url::parse(&self.config.url)?;
        let scope = self
            .scope
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("key", self.api_keys.key().expose_secret())
                .append_pair("secret", self.api_keys.secret().expose_secret());
            if let Some(scope) = scope.as_deref() {
                query.append_pair("scope", scope);
            }
        }
        Ok(url)
    }

    fn publish(&self, event: ClientEvent) {
        // No receivers is fine.
        let _ = self.events_tx.send(event);
    }

    fn should_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::Acquire) && !self.reset.load(Ordering::Acquire)
    }

    async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Open a socket unless one is already live, and replay subscriptions on it.
    ///
    /// Returns the read half and connection epoch when a new socket was
    /// opened; the caller owns reading from it. Returns `None` if another
    /// task already connected, or if the client was closed (or, when
    /// `reconnecting`, auto-reconnect was disabled) during the handshake.
    async fn establish(&self, reconnecting: bool) -> Result<Option<(WsSource, u64)>, Error> {
        let _connecting = self.connect_lock.lock().await;
        if self.is_connected().await {
            return Ok(None);
        }
        // Held through the replay so a concurrent subscribe can't send first.
        let subscriptions = self.subscriptions.lock().await;

        let url = self.connect_url()?;
        tracing::info!(host = url.host_str().unwrap_or(""), "Connecting to event stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
        let (sink, source) = ws_stream.split();

        let mut connection = self.connection.lock().await;
        let stopped = self.reset.load(Ordering::Acquire)
            || (reconnecting && !self.auto_reconnect.load(Ordering::Acquire));
        if stopped {
            tracing::debug!("Closed during handshake, dropping new socket");
            return Ok(None);
        }

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let conn = connection.insert(Connection { epoch, sink });
        tracing::info!(epoch, "Event stream connected");
        self.publish(ClientEvent::Connected);

        let mut replayed = Ok(());
        for selector in subscriptions.iter() {
            replayed = conn.send("Subscribe", selector).await;
            if replayed.is_err() {
                break;
            }
        }
        if let Err(e) = replayed {
            *connection = None;
            return Err(e);
        }
        if !subscriptions.is_empty() {
            tracing::info!(count = subscriptions.len(), "Resubscribed");
        }
        Ok(Some((source, epoch)))
    }

    /// Connect if needed and start a reader for a new socket.
    async fn ensure_connected(self: &Arc<Self>) -> Result<(), Error> {
        if let Some((source, epoch)) = self.establish(false).await? {
            tokio::spawn(Arc::clone(self).run(source, epoch));
        }
        Ok(())
    }

    /// Drop the write half if it still belongs to connection `epoch`.
    async fn release(&self, epoch: u64) {
        let mut connection = self.connection.lock().await;
        if connection.as_ref().is_some_and(|c| c.epoch == epoch) {
            *connection = None;
        }
    }

    // ── Background reader ────────────────────────────────────────────

    /// Read until the socket drops, then reconnect while allowed.
    async fn run(self: Arc<Self>, mut source: WsSource, mut epoch: u64) {
        loop {
            self.read_until_closed(&mut source).await;
            drop(source);

            if self.epoch.load(Ordering::Acquire) != epoch {
                // A newer connection owns the stream now.
                tracing::debug!(epoch, "Stale reader exiting");
                return;
            }
            self.release(epoch).await;
            self.publish(ClientEvent::Disconnected);
            tracing::info!(epoch, "Event stream disconnected");

            match self.reconnect().await {
                Some((next_source, next_epoch)) => {
                    source = next_source;
                    epoch = next_epoch;
                }
                None => break,
            }
        }

        tracing::debug!("Event reader exiting");
    }

    /// Retry until connected, closed, or another task owns the new socket.
    async fn reconnect(&self) -> Option<(WsSource, u64)> {
        while self.should_reconnect() {
            match self.establish(true).await {
                Ok(Some(opened)) => return Some(opened),
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        delay_ms = u64::try_from(self.config.reconnect_delay.as_millis())
                            .unwrap_or(u64::MAX),
                        "Event stream reconnect failed"
                    );
                    tokio::select! {
                        () = self.closing.notified() => {}
                        () = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }
        None
    }

    async fn read_until_closed(&self, source: &mut WsSource) {
        loop {
            if self.reset.load(Ordering::Acquire) {
                return;
            }

            let frame = tokio::select! {
                biased;
                () = self.closing.notified() => return,
                frame = source.next() => frame,
            };

            let raw = match frame {
                Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                Some(Ok(Message::Close(frame))) => {
                    if let Some(ref cf) = frame {
                        tracing::info!(code = %cf.code, reason = %cf.reason, "Close frame received");
                    } else {
                        tracing::info!("Close frame received (no payload)");
                    }
                    return;
                }
                Some(Ok(_)) => {
                    // Ping/Pong are answered by tungstenite.
                    continue;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Event stream receive failed");
                    return;
                }
                None => {
                    tracing::info!("Event stream ended");
                    return;
                }
            };

            match decode_frame(&raw, &self.registry) {
                Ok(Some(event)) => {
                    tracing::trace!(name = %event.name, resource = %event.resource, "Event received");
                    self.publish(ClientEvent::Received(Arc::new(event)));
                }
                Ok(None) => {}
                Err(MalformedFrame(reason)) => {
                    tracing::warn!(%reason, "Malformed frame, dropping connection");
                    return;
                }
            }
        }
    }
}

fn not_connected() -> Error {
    Error::WebSocketSend("not connected".into())
}

// ── EventClient ──────────────────────────────────────────────────────

/// Client for the WIFIPLUG event stream.
///
/// Cheap to clone; clones share one socket and subscription set. Call
/// [`close`](Self::close) to stop the background reader.
///
/// ```rust,ignore
/// use wifiplug_api::events::{ClientEvent, EventClient, EventClientConfig, EventSelector};
///
/// let client = EventClient::new(keys, EventClientConfig::default());
/// let mut rx = client.subscribe_events();
/// client.subscribe(&"device:*.*".parse()?, &cancel).await?;
///
/// while let Ok(ClientEvent::Received(event)) = rx.recv().await {
///     println!("{} {}", event.resource, event.name);
/// }
/// ```
#[derive(Clone)]
pub struct EventClient {
    inner: Arc<Inner>,
}

impl EventClient {
    pub fn new(api_keys: ApiKeys, config: EventClientConfig) -> Self {
        Self::with_registry(api_keys, config, EventDataRegistry::default())
    }

    /// Client that resolves event payloads through `registry`.
    pub fn with_registry(
        api_keys: ApiKeys,
        config: EventClientConfig,
        registry: EventDataRegistry,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let auto_reconnect = config.auto_reconnect;

        Self {
            inner: Arc::new(Inner {
                config,
                api_keys,
                registry,
                scope: std::sync::Mutex::new(None),
                connect_lock: Mutex::new(()),
                connection: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                epoch: AtomicU64::new(0),
                auto_reconnect: AtomicBool::new(auto_reconnect),
                reset: AtomicBool::new(false),
                closing: Notify::new(),
                events_tx,
            }),
        }
    }

    /// Receive connection notifications and events.
    ///
    /// A receiver that falls behind gets
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Principal the stream acts for; applied on the next connect.
    pub fn set_scope(&self, scope: Option<String>) {
        *self
            .inner
            .scope
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = scope;
    }

    pub fn scope(&self) -> Option<String> {
        self.inner
            .scope
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.auto_reconnect.store(enabled, Ordering::Release);
    }

    pub fn auto_reconnect(&self) -> bool {
        self.inner.auto_reconnect.load(Ordering::Acquire)
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    /// Snapshot of the active selectors, in subscription order.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().await.clone()
    }

    /// Open the socket if it isn't already open.
    ///
    /// Selectors still in the subscription set are replayed on the new socket.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.inner.reset.store(false, Ordering::Release);
        self.inner.ensure_connected().await
    }

    /// Subscribe to `selector`, connecting first if needed.
    pub async fn subscribe(
        &self,
        selector: &EventSelector,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let selector = selector.to_string();
        self.connect(cancel).await?;

        let mut subscriptions = self.inner.subscriptions.lock().await;
        self.send(cancel, "Subscribe", &selector).await?;
        if !subscriptions.contains(&selector) {
            subscriptions.push(selector.clone());
        }

        tracing::debug!(%selector, "Subscribed");
        Ok(())
    }

    /// Unsubscribe from a previously subscribed `selector`.
    pub async fn unsubscribe(
        &self,
        selector: &EventSelector,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let selector = selector.to_string();
        self.connect(cancel).await?;

        let mut subscriptions = self.inner.subscriptions.lock().await;
        self.send(cancel, "Unsubscribe", &selector).await?;
        subscriptions.retain(|s| *s != selector);

        tracing::debug!(%selector, "Unsubscribed");
        Ok(())
    }

    /// Send one envelope under the send lock. Callers hold the subscription lock.
    async fn send(
        &self,
        cancel: &CancellationToken,
        kind: &'static str,
        selector: &str,
    ) -> Result<(), Error> {
        let mut connection = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            connection = self.inner.connection.lock() => connection,
        };
        // The send itself is not cancellable.
        connection
            .as_mut()
            .ok_or_else(not_connected)?
            .send(kind, selector)
            .await
    }

    /// Stop reconnecting and close the socket. Safe to call repeatedly.
    ///
    /// The subscription set is kept and replayed by a later connect.
    pub async fn close(&self) {
        self.inner.reset.store(true, Ordering::Release);
        self.inner.closing.notify_waiters();

        let connection = self.inner.connection.lock().await.take();
        if let Some(mut conn) = connection {
            if let Err(e) = conn.sink.close().await {
                tracing::debug!(error = %e, "Close handshake failed");
            }
            tracing::info!(epoch = conn.epoch, "Event stream closed");
        }
    }
}

impl std::fmt::Debug for EventClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventClient")
            .field("url", &self.inner.config.url)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

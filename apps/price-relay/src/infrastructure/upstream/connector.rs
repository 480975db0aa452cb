//! Upstream Connector
//!
//! Owns one streaming connection to the upstream feed for one subscription
//! set and runs its reconnect state machine:
//!
//! ```text
//! Disconnected ─► Connecting ─► Subscribed ─► Streaming
//!                     ▲                           │
//!                     └──────── Degraded ◄────────┘  (any transport error)
//! ```
//!
//! A failed open also lands in `Degraded`. From `Degraded` the connector
//! waits out the reconnect delay, reconnects and re-sends the subscribe
//! message. Only [`UpstreamConnector::close`], a dropped consumer or an
//! exhausted attempt cap end the loop, always in `Disconnected`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::codec::FrameDecoder;
use super::messages::SubscribeRequest;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::state::ConnectionState;
use crate::domain::instrument::UpstreamSymbol;
use crate::infrastructure::fanout::{self, FanoutReceiver, FanoutSender};
use crate::infrastructure::metrics::{self, ConnectorRole};

/// Production streaming endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "wss://streamer.finance.yahoo.com/";

// =============================================================================
// Error Type
// =============================================================================

/// Connector-level failures. All but the last trigger a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Subscribe message could not be encoded.
    #[error("failed to encode subscribe request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Nothing to subscribe to.
    #[error("no symbols to subscribe")]
    NoSymbols,

    /// No frame arrived within the idle timeout.
    #[error("no frame within {0:?}")]
    IdleTimeout(Duration),

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Reconnect attempt cap reached.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

// =============================================================================
// Configuration
// =============================================================================

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// WebSocket URL of the upstream feed.
    pub url: String,
    /// Reconnect schedule.
    pub reconnect: ReconnectConfig,
    /// Read timeout; `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Path this connector serves, for logs and metrics.
    pub role: ConnectorRole,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_URL)
    }
}

impl ConnectorConfig {
    /// Configuration for `url` with the fixed reconnect delay and no idle timeout.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            idle_timeout: None,
            role: ConnectorRole::Monitor,
        }
    }

    /// Set the reconnect schedule.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the idle read timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the role label.
    #[must_use]
    pub fn with_role(mut self, role: ConnectorRole) -> Self {
        self.role = role;
        self
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    frames_received: AtomicU64,
    decode_failures: AtomicU64,
    ticks_forwarded: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time connector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectorStats {
    /// Data frames read.
    pub frames_received: u64,
    /// Frames discarded by the decoder.
    pub decode_failures: u64,
    /// Ticks handed to the consumer.
    pub ticks_forwarded: u64,
    /// Reconnect attempts.
    pub reconnects: u64,
}

// =============================================================================
// Connector
// =============================================================================

/// One upstream WebSocket connection with automatic reconnection.
#[derive(Debug)]
pub struct UpstreamConnector {
    id: Uuid,
    config: ConnectorConfig,
    decoder: FrameDecoder,
    symbols: watch::Sender<Vec<UpstreamSymbol>>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    counters: Counters,
}

impl UpstreamConnector {
    /// Create a connector. Cancelling `cancel` closes it.
    #[must_use]
    pub fn new(config: ConnectorConfig, cancel: CancellationToken) -> Self {
        metrics::record_connector_created();
        Self {
            id: Uuid::new_v4(),
            config,
            decoder: FrameDecoder::new(),
            symbols: watch::Sender::new(Vec::new()),
            state: watch::Sender::new(ConnectionState::Disconnected),
            cancel,
            counters: Counters::default(),
        }
    }

    /// Unique connector id, used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Configuration in force.
    #[must_use]
    pub const fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Add symbols to the subscription set.
    ///
    /// The full set is sent after every (re)connect. When the connection is
    /// already up and the set grew, it is re-sent straight away.
    pub fn subscribe(&self, symbols: impl IntoIterator<Item = UpstreamSymbol>) {
        let mut symbols = symbols.into_iter().peekable();
        if symbols.peek().is_none() {
            return;
        }
        self.symbols.send_if_modified(|current| {
            let before = current.len();
            for symbol in symbols {
                if !current.contains(&symbol) {
                    current.push(symbol);
                }
            }
            current.len() != before
        });
    }

    /// Current subscription set.
    #[must_use]
    pub fn symbols(&self) -> Vec<UpstreamSymbol> {
        self.symbols.borrow().clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> ConnectorStats {
        ConnectorStats {
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            ticks_forwarded: self.counters.ticks_forwarded.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Stop the read loop. No further reconnects are attempted. Idempotent.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(connector_id = %self.id, "closing upstream connector");
        }
        self.cancel.cancel();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Whether [`close`](Self::close) was called or the parent token cancelled.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn the read loop and return its ticks as a stream.
    #[must_use]
    pub fn stream(self: &Arc<Self>, capacity: usize) -> FanoutReceiver {
        let (sink, receiver) = fanout::channel(capacity);
        drop(self.spawn(sink));
        receiver
    }

    /// Spawn the read loop feeding `sink`.
    pub fn spawn(self: &Arc<Self>, sink: FanoutSender) -> JoinHandle<Result<(), ConnectorError>> {
        let connector = Arc::clone(self);
        tokio::spawn(async move {
            let id = connector.id;
            let result = connector.run(sink).await;
            if let Err(e) = &result {
                tracing::error!(connector_id = %id, error = %e, "upstream connector stopped");
            }
            result
        })
    }

    /// Connect, subscribe and stream ticks into `sink` until closed.
    ///
    /// Transport failures are retried under the reconnect policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::NoSymbols`] when the subscription set is
    /// empty and [`ConnectorError::MaxReconnectAttemptsExceeded`] when an
    /// attempt cap is configured and reached.
    pub async fn run(self: Arc<Self>, sink: FanoutSender) -> Result<(), ConnectorError> {
        if self.symbols.borrow().is_empty() {
            return Err(ConnectorError::NoSymbols);
        }

        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        let role = self.config.role;

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }

            match self.connect_and_stream(&sink, &mut policy).await {
                Ok(()) => break Ok(()),
                Err(e) => {
                    self.set_state(ConnectionState::Degraded);
                    tracing::warn!(
                        connector_id = %self.id,
                        role = role.as_str(),
                        error = %e,
                        "upstream connection error"
                    );

                    let Some(delay) = policy.next_delay() else {
                        break Err(ConnectorError::MaxReconnectAttemptsExceeded(
                            policy.attempt_count(),
                        ));
                    };

                    self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::record_reconnect(role);
                    tracing::info!(
                        connector_id = %self.id,
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "reconnecting upstream"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => break Ok(()),
                        () = sink.closed() => break Ok(()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        self.set_state(ConnectionState::Disconnected);
        result
    }

    /// One connection lifetime. `Ok` means stop; `Err` means reconnect.
    async fn connect_and_stream(
        &self,
        sink: &FanoutSender,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ConnectorError> {
        self.set_state(ConnectionState::Connecting);
        tracing::debug!(connector_id = %self.id, url = %self.config.url, "connecting upstream");

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            () = sink.closed() => return Ok(()),
            connected = tokio_tungstenite::connect_async(self.config.url.as_str()) => connected?,
        };
        let (mut write, mut read) = ws_stream.split();

        let mut symbols_rx = self.symbols.subscribe();
        let symbols = symbol_list(&mut symbols_rx);
        send_subscribe(&mut write, &symbols).await?;
        self.set_state(ConnectionState::Subscribed);
        tracing::info!(connector_id = %self.id, symbols = ?symbols, "subscribed upstream");

        let mut streaming = false;
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                () = sink.closed() => {
                    tracing::debug!(connector_id = %self.id, "consumer dropped");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                changed = symbols_rx.changed() => {
                    if changed.is_ok() {
                        let symbols = symbol_list(&mut symbols_rx);
                        send_subscribe(&mut write, &symbols).await?;
                        tracing::info!(connector_id = %self.id, symbols = ?symbols, "subscription updated");
                    }
                }
                frame = next_frame(&mut read, self.config.idle_timeout) => {
                    let text = match frame? {
                        Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                        Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(connector_id = %self.id, ?frame, "upstream sent close frame");
                            return Err(ConnectorError::ConnectionClosed);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(ConnectorError::ConnectionClosed),
                    };

                    if !streaming {
                        streaming = true;
                        policy.reset();
                        self.set_state(ConnectionState::Streaming);
                    }

                    if !self.forward(&text, sink).await {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Decode and deliver one frame. Returns `false` when the loop should stop.
    async fn forward(&self, text: &str, sink: &FanoutSender) -> bool {
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_received(self.config.role);

        match self.decoder.decode(text) {
            Ok(tick) => {
                tokio::select! {
                    () = self.cancel.cancelled() => false,
                    sent = sink.send(tick) => {
                        if sent.is_ok() {
                            self.counters.ticks_forwarded.fetch_add(1, Ordering::Relaxed);
                        }
                        sent.is_ok()
                    }
                }
            }
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_decode_failure(e.reason());
                tracing::debug!(
                    connector_id = %self.id,
                    reason = e.reason(),
                    error = %e,
                    "discarding upstream frame"
                );
                true
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        if self.cancel.is_cancelled() && next != ConnectionState::Disconnected {
            return;
        }
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            metrics::record_state_transition(*current, next);
            tracing::debug!(connector_id = %self.id, from = %current, to = %next, "connector state");
            *current = next;
            true
        });
    }
}

impl Drop for UpstreamConnector {
    fn drop(&mut self) {
        metrics::record_connector_dropped(*self.state.borrow());
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn symbol_list(rx: &mut watch::Receiver<Vec<UpstreamSymbol>>) -> Vec<String> {
    rx.borrow_and_update()
        .iter()
        .map(ToString::to_string)
        .collect()
}

async fn send_subscribe<W>(write: &mut W, symbols: &[String]) -> Result<(), ConnectorError>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = SubscribeRequest::new(symbols.iter().cloned()).to_json()?;
    tracing::trace!(%json, "sending subscribe request");
    write.send(Message::Text(json.into())).await?;
    Ok(())
}

async fn next_frame<S>(
    read: &mut S,
    idle_timeout: Option<Duration>,
) -> Result<Option<Result<Message, tungstenite::Error>>, ConnectorError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    match idle_timeout {
        None => Ok(read.next().await),
        Some(limit) => tokio::time::timeout(limit, read.next())
            .await
            .map_err(|_| ConnectorError::IdleTimeout(limit)),
    }
}

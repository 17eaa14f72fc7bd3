//! Stream Connection
//!
//! One WebSocket session per (exchange, symbol, stream kind). Once started,
//! a Tokio task connects, sends the venue handshake and decodes every
//! inbound frame through the venue's [`ExchangeFeed`], passing each
//! normalized message to the attached handlers in attachment order.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start──► Running ──stop──► Stopped ──start──► Running
//!                       │
//!                       └── network loss ──► Stopped (ConnectionLost)
//! ```
//!
//! Starting a running connection and stopping a stopped one are no-ops.
//! Reconnection only happens when `WebSocketSettings::auto_reconnect` is set.

pub mod reconnect;

use std::fmt;
use std::sync::{Arc, Once};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use self::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{ExchangeFeed, FeedContext, FeedError};
use crate::domain::streaming::{StreamKey, StreamMessage};
use crate::infrastructure::config::WebSocketSettings;
use crate::infrastructure::events::{ConnectionEvent, EventHub};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a single WebSocket session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// Server closed the connection.
    #[error("connection closed: {0}")]
    Closed(String),

    /// Nothing was received within the heartbeat timeout.
    #[error("no traffic for {0:?}")]
    HeartbeatTimeout(Duration),

    /// Handshake frames could not be sent.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

// =============================================================================
// Types
// =============================================================================

/// Handler invoked for every decoded message.
pub type MessageHandler = Arc<dyn Fn(&StreamMessage) + Send + Sync>;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, never started.
    Created,
    /// Receive task running.
    Running,
    /// Stopped on request or by a network loss.
    Stopped,
}

/// Where and how to subscribe.
#[derive(Clone)]
pub struct ConnectionSpec {
    /// WebSocket URL.
    pub url: String,
    /// Venue-native symbol.
    pub exchange_symbol: String,
    /// Text frames sent right after connecting.
    pub frames: Vec<String>,
}

impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Frames may carry credentials.
        f.debug_struct("ConnectionSpec")
            .field("url", &self.url)
            .field("exchange_symbol", &self.exchange_symbol)
            .field("frames", &self.frames.len())
            .finish()
    }
}

enum RunState {
    Created,
    Running {
        cancel: CancellationToken,
        generation: u64,
    },
    Stopped,
}

struct StateCell {
    run: RunState,
    generation: u64,
    lost: Option<String>,
}

struct Inner {
    id: Uuid,
    key: StreamKey,
    spec: ConnectionSpec,
    feed: Arc<dyn ExchangeFeed>,
    settings: WebSocketSettings,
    events: EventHub,
    handlers: RwLock<Vec<MessageHandler>>,
    state: Mutex<StateCell>,
}

// =============================================================================
// Stream Connection
// =============================================================================

/// Handle to one streaming connection. Clones share the same session.
#[derive(Clone)]
pub struct StreamConnection {
    inner: Arc<Inner>,
}

impl fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("spec", &self.inner.spec)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Create a connection in the `Created` state.
    #[must_use]
    pub fn new(
        key: StreamKey,
        spec: ConnectionSpec,
        feed: Arc<dyn ExchangeFeed>,
        settings: WebSocketSettings,
        events: EventHub,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                key,
                spec,
                feed,
                settings,
                events,
                handlers: RwLock::new(Vec::new()),
                state: Mutex::new(StateCell {
                    run: RunState::Created,
                    generation: 0,
                    lost: None,
                }),
            }),
        }
    }

    /// Unique connection id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Stream this connection serves.
    #[must_use]
    pub fn key(&self) -> &StreamKey {
        &self.inner.key
    }

    /// WebSocket URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.spec.url
    }

    /// Venue-native symbol.
    #[must_use]
    pub fn exchange_symbol(&self) -> &str {
        &self.inner.spec.exchange_symbol
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match self.inner.state.lock().run {
            RunState::Created => ConnectionState::Created,
            RunState::Running { .. } => ConnectionState::Running,
            RunState::Stopped => ConnectionState::Stopped,
        }
    }

    /// Whether the receive task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ConnectionState::Running
    }

    /// Cause of the last network loss, cleared by the next `start`.
    ///
    /// `None` while running, after a requested stop, or if the connection
    /// never lost its session.
    #[must_use]
    pub fn lost_reason(&self) -> Option<String> {
        self.inner.state.lock().lost.clone()
    }

    /// Attach a handler. Handlers run in attachment order.
    pub fn append_callback(&self, handler: MessageHandler) {
        self.inner.handlers.write().push(handler);
    }

    /// Spawn the receive task.
    ///
    /// Returns `false` without doing anything if the connection is already
    /// running or there is no Tokio runtime to spawn on.
    pub fn start(&self) -> bool {
        let mut state = self.inner.state.lock();
        if matches!(state.run, RunState::Running { .. }) {
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(stream = %self.inner.key, "Cannot start stream outside a Tokio runtime");
            return false;
        };

        state.generation += 1;
        state.lost = None;
        let generation = state.generation;
        let cancel = CancellationToken::new();
        state.run = RunState::Running {
            cancel: cancel.clone(),
            generation,
        };
        drop(state);

        runtime.spawn(Arc::clone(&self.inner).run(cancel, generation));

        tracing::info!(stream = %self.inner.key, url = %self.inner.spec.url, "Stream started");
        metrics::stream_started(self.inner.key.exchange);
        self.inner.events.publish(ConnectionEvent::Started {
            key: self.inner.key.clone(),
        });
        true
    }

    /// Cancel the receive task.
    ///
    /// Returns `false` if the connection was not running. The task exits at
    /// its next suspension point; a handler already executing completes.
    pub fn stop(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !matches!(state.run, RunState::Running { .. }) {
            return false;
        }
        let RunState::Running { cancel, .. } =
            std::mem::replace(&mut state.run, RunState::Stopped)
        else {
            return false;
        };
        drop(state);

        cancel.cancel();

        tracing::info!(stream = %self.inner.key, "Stream stopped");
        metrics::stream_stopped(self.inner.key.exchange);
        self.inner.events.publish(ConnectionEvent::Stopped {
            key: self.inner.key.clone(),
        });
        true
    }

    /// Hand a decoded message to every handler, as the receive task does.
    pub fn deliver(&self, message: &StreamMessage) {
        self.inner.deliver(message);
    }
}

// =============================================================================
// Receive Task
// =============================================================================

static CRYPTO_PROVIDER: Once = Once::new();

fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Fails only if the embedding application installed one already.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

impl Inner {
    async fn run(self: Arc<Self>, cancel: CancellationToken, generation: u64) {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::from(&self.settings));

        let reason = loop {
            let err = match self.connect_and_run(&cancel, &mut policy).await {
                Ok(()) => return,
                Err(e) => e,
            };

            tracing::warn!(stream = %self.key, error = %err, "Stream connection error");

            if !self.settings.auto_reconnect {
                break err.to_string();
            }

            let Some(delay) = policy.next_delay() else {
                break format!("{err} (reconnect attempts exhausted)");
            };

            let attempt = policy.attempt_count();
            tracing::info!(
                stream = %self.key,
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting stream"
            );
            metrics::record_reconnect(self.key.exchange);
            self.events.publish(ConnectionEvent::Reconnecting {
                key: self.key.clone(),
                attempt,
            });

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        };

        self.mark_lost(generation, reason);
    }

    fn mark_lost(&self, generation: u64, reason: String) {
        let mut state = self.state.lock();
        let current = matches!(
            state.run,
            RunState::Running { generation: g, .. } if g == generation
        );
        if !current {
            return;
        }
        state.run = RunState::Stopped;
        state.lost = Some(reason.clone());
        drop(state);

        tracing::warn!(stream = %self.key, %reason, "Stream connection lost");
        metrics::record_connection_lost(self.key.exchange);
        metrics::stream_stopped(self.key.exchange);
        self.events.publish(ConnectionEvent::ConnectionLost {
            key: self.key.clone(),
            reason,
        });
    }

    /// Connect and process frames until cancelled or the session fails.
    async fn connect_and_run(
        &self,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ConnectionError> {
        install_crypto_provider();
        tracing::debug!(stream = %self.key, url = %self.spec.url, "Connecting");

        let (ws_stream, _response) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.spec.url.as_str()) => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        for frame in &self.spec.frames {
            write
                .send(Message::Text(frame.clone().into()))
                .await
                .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        }

        policy.reset();
        tracing::info!(stream = %self.key, "Stream connected");
        self.events.publish(ConnectionEvent::Connected {
            key: self.key.clone(),
        });

        let ctx = FeedContext {
            kind: self.key.kind,
            symbol: &self.key.symbol,
            exchange_symbol: &self.spec.exchange_symbol,
        };

        let mut ping = tokio::time::interval_at(
            Instant::now() + self.settings.ping_interval,
            self.settings.ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping.tick() => {
                    if last_seen.elapsed() > self.settings.heartbeat_timeout {
                        return Err(ConnectionError::HeartbeatTimeout(self.settings.heartbeat_timeout));
                    }
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_seen = Instant::now();
                            self.handle_text(&ctx, text.as_str());
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            last_seen = Instant::now();
                            match std::str::from_utf8(&bytes) {
                                Ok(text) => self.handle_text(&ctx, text),
                                Err(_) => tracing::debug!(stream = %self.key, "Ignoring non-UTF-8 binary frame"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_seen = Instant::now();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_seen = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map_or_else(
                                || "server sent close frame".to_string(),
                                |f| format!("server sent close frame ({}): {}", f.code, f.reason.as_str()),
                            );
                            return Err(ConnectionError::Closed(reason));
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(ConnectionError::Closed("stream ended".to_string())),
                    }
                }
            }
        }
    }

    fn handle_text(&self, ctx: &FeedContext<'_>, text: &str) {
        match self.feed.decode(ctx, text) {
            Ok(messages) => {
                for message in &messages {
                    self.deliver(message);
                }
            }
            Err(FeedError::Upstream { code, message }) => {
                metrics::record_decode_error(self.key.exchange);
                tracing::warn!(stream = %self.key, ?code, %message, "Exchange reported an error");
            }
            Err(e) => {
                metrics::record_decode_error(self.key.exchange);
                tracing::warn!(stream = %self.key, error = %e, "Failed to decode frame");
                tracing::trace!(stream = %self.key, frame = text, "Undecodable frame");
            }
        }
    }

    fn deliver(&self, message: &StreamMessage) {
        metrics::record_message_received(self.key.exchange, self.key.kind);
        tracing::trace!(stream = %self.key, ?message, "Delivering message");
        let handlers = self.handlers.read().clone();
        for handler in &handlers {
            handler(message);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

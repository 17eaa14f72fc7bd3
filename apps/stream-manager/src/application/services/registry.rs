//! Stream Registry
//!
//! Owns the `exchange -> symbol -> (connection, callbacks)` mapping for one
//! stream kind. The ticker and order book managers each hold a registry
//! and layer their payload handling on top of it.
//!
//! Locks guard map operations only. Callbacks are always invoked on a
//! cloned list with no registry lock held, so a callback may append more
//! callbacks or close streams.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::error::StreamError;
use crate::application::ports::FeedContext;
use crate::domain::streaming::{StreamKey, StreamKind};
use crate::domain::subscription::{BoundArgs, Callback, CallbackId, CallbackList, DispatchOutcome};
use crate::domain::symbol::{Exchange, canonicalize, to_exchange_symbol};
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::connection::{ConnectionSpec, MessageHandler, StreamConnection};
use crate::infrastructure::events::EventHub;
use crate::infrastructure::exchanges::FeedRegistry;
use crate::infrastructure::metrics;

// =============================================================================
// Target
// =============================================================================

/// Exchange and symbol a call refers to. Omitted parts fall back to the
/// configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTarget {
    /// Canonical symbol (`BTC-USD`), or `None` for the default symbol.
    pub symbol: Option<String>,
    /// Exchange name (`coinbase_pro`), or `None` for the default exchange.
    pub exchange: Option<String>,
}

impl StreamTarget {
    /// Target a symbol on an exchange.
    #[must_use]
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            exchange: Some(exchange.into()),
        }
    }

    /// Set the symbol.
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Set the exchange.
    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Callback list shared between a registry slot and its connection handler.
pub type SharedCallbacks<T> = Arc<RwLock<CallbackList<T>>>;

struct StreamSlot<T> {
    connection: StreamConnection,
    callbacks: SharedCallbacks<T>,
}

/// Connections and callbacks for one stream kind.
pub struct StreamRegistry<T> {
    kind: StreamKind,
    settings: Arc<StreamSettings>,
    feeds: FeedRegistry,
    events: EventHub,
    streams: RwLock<HashMap<Exchange, HashMap<String, StreamSlot<T>>>>,
}

impl<T> std::fmt::Debug for StreamRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("kind", &self.kind)
            .field("feeds", &self.feeds)
            .field("streams", &self.stream_keys())
            .finish_non_exhaustive()
    }
}

impl<T> StreamRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new(kind: StreamKind, settings: Arc<StreamSettings>, feeds: FeedRegistry) -> Self {
        let events = EventHub::new(settings.event_capacity);
        Self {
            kind,
            settings,
            feeds,
            events,
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Stream kind served by this registry.
    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Settings the registry was built with.
    #[must_use]
    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Connection event hub shared by every connection of this registry.
    #[must_use]
    pub const fn events(&self) -> &EventHub {
        &self.events
    }

    /// Create the per-exchange mapping if it does not exist yet.
    pub fn ensure_stream_slot(&self, exchange: Exchange) {
        self.streams.write().entry(exchange).or_default();
    }

    /// Resolve a target to an exchange and canonical symbol.
    ///
    /// # Errors
    ///
    /// `UnsupportedExchange` for an unknown exchange name,
    /// `UnsupportedSymbolFormat` if the symbol does not fit the exchange.
    pub fn resolve_target(&self, target: &StreamTarget) -> Result<(Exchange, String), StreamError> {
        let exchange_name = target
            .exchange
            .as_deref()
            .unwrap_or(&self.settings.default_exchange);
        let exchange: Exchange = exchange_name.parse()?;

        let symbol = target
            .symbol
            .as_deref()
            .unwrap_or(&self.settings.default_symbol);
        let canonical = canonicalize(symbol, exchange)?;

        Ok((exchange, canonical))
    }

    /// Resolve a target to its stream key.
    ///
    /// # Errors
    ///
    /// Same as [`Self::resolve_target`].
    pub fn key(&self, target: &StreamTarget) -> Result<StreamKey, StreamError> {
        let (exchange, symbol) = self.resolve_target(target)?;
        Ok(StreamKey::new(exchange, symbol, self.kind))
    }

    /// Create, register and (unless `initially_stopped`) start a connection.
    ///
    /// `make_handler` builds the connection's message handler from the new
    /// key and callback list; it runs before the connection exists.
    /// Unsupported exchanges are logged and yield `Ok(None)`. An existing
    /// stream for the same key is stopped and replaced once the new one has
    /// started.
    ///
    /// # Errors
    ///
    /// Symbol format errors, handshake encoding errors, errors returned by
    /// `make_handler`, and `NoRuntime` if the stream should start but no
    /// Tokio runtime is available. Nothing is registered on error.
    pub fn open<H>(
        &self,
        target: &StreamTarget,
        callback: Callback<T>,
        args: BoundArgs,
        initially_stopped: bool,
        make_handler: H,
    ) -> Result<Option<StreamConnection>, StreamError>
    where
        H: FnOnce(&StreamKey, SharedCallbacks<T>) -> Result<MessageHandler, StreamError>,
    {
        let (exchange, symbol) = match self.resolve_target(target) {
            Ok(resolved) => resolved,
            Err(StreamError::UnsupportedExchange(name)) => {
                tracing::warn!(exchange = %name, kind = %self.kind, "Unsupported exchange, stream not created");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(feed) = self.feeds.get(exchange) else {
            tracing::warn!(%exchange, kind = %self.kind, "No feed registered, stream not created");
            return Ok(None);
        };

        let exchange_symbol = to_exchange_symbol(&symbol, exchange)?;
        let venue = self.settings.exchange(exchange);
        let ctx = FeedContext {
            kind: self.kind,
            symbol: &symbol,
            exchange_symbol: &exchange_symbol,
        };
        let url = feed.endpoint(&ctx, venue, self.settings.use_sandbox_websockets);
        let frames = feed.handshake(&ctx, venue)?;

        let key = StreamKey::new(exchange, symbol.clone(), self.kind);
        if !initially_stopped && tokio::runtime::Handle::try_current().is_err() {
            return Err(StreamError::NoRuntime(key));
        }

        let callbacks: SharedCallbacks<T> = Arc::new(RwLock::new(CallbackList::new()));
        callbacks.write().push(callback, args);

        let handler = make_handler(&key, Arc::clone(&callbacks))?;

        let connection = StreamConnection::new(
            key.clone(),
            ConnectionSpec {
                url,
                exchange_symbol,
                frames,
            },
            feed,
            self.settings.websocket.clone(),
            self.events.clone(),
        );
        connection.append_callback(handler);

        if !initially_stopped && !connection.start() {
            return Err(StreamError::NoRuntime(key));
        }

        let replaced = self.streams.write().entry(exchange).or_default().insert(
            symbol,
            StreamSlot {
                connection: connection.clone(),
                callbacks,
            },
        );
        if let Some(previous) = replaced {
            tracing::info!(stream = %key, "Replacing existing stream");
            previous.connection.stop();
        }

        tracing::info!(stream = %key, url = %connection.url(), "Stream created");
        Ok(Some(connection))
    }

    /// Append a callback to an existing stream.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if no stream exists for the target, plus resolution
    /// errors.
    pub fn append_callback(
        &self,
        target: &StreamTarget,
        callback: Callback<T>,
        args: BoundArgs,
    ) -> Result<CallbackId, StreamError> {
        let callbacks = self.callbacks(target)?;
        let id = callbacks.write().push(callback, args);
        Ok(id)
    }

    /// Remove a callback. Returns `false` if the id was not registered.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if no stream exists for the target.
    pub fn remove_callback(&self, target: &StreamTarget, id: CallbackId) -> Result<bool, StreamError> {
        let callbacks = self.callbacks(target)?;
        let removed = callbacks.write().remove(id);
        Ok(removed)
    }

    /// Number of callbacks on a stream.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if no stream exists for the target.
    pub fn callback_count(&self, target: &StreamTarget) -> Result<usize, StreamError> {
        let callbacks = self.callbacks(target)?;
        let count = callbacks.read().len();
        Ok(count)
    }

    /// Connection handle for a stream.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if no stream exists for the target.
    pub fn connection(&self, target: &StreamTarget) -> Result<StreamConnection, StreamError> {
        let key = self.key(target)?;
        self.streams
            .read()
            .get(&key.exchange)
            .and_then(|symbols| symbols.get(&key.symbol))
            .map(|slot| slot.connection.clone())
            .ok_or_else(|| StreamError::unknown(&key))
    }

    /// Connection handle for a stream whose session is still usable.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if no stream exists for the target, `ConnectionLost`
    /// if its session ended by a network loss and it was not started again.
    pub fn live_connection(&self, target: &StreamTarget) -> Result<StreamConnection, StreamError> {
        let connection = self.connection(target)?;
        match connection.lost_reason() {
            Some(reason) => Err(StreamError::ConnectionLost {
                key: connection.key().clone(),
                reason,
            }),
            None => Ok(connection),
        }
    }

    /// Stop a stream and discard its connection and callbacks.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if no stream exists for the target.
    pub fn close_websocket(&self, target: &StreamTarget) -> Result<(), StreamError> {
        let key = self.key(target)?;
        let slot = self
            .streams
            .write()
            .get_mut(&key.exchange)
            .and_then(|symbols| symbols.remove(&key.symbol))
            .ok_or_else(|| StreamError::unknown(&key))?;

        slot.connection.stop();
        tracing::info!(stream = %key, "Stream closed");
        Ok(())
    }

    /// Keys of every registered stream, sorted.
    #[must_use]
    pub fn stream_keys(&self) -> Vec<StreamKey> {
        let mut keys: Vec<StreamKey> = self
            .streams
            .read()
            .values()
            .flat_map(|symbols| symbols.values())
            .map(|slot| slot.connection.key().clone())
            .collect();
        keys.sort_by(|a, b| {
            (a.exchange, a.symbol.as_str()).cmp(&(b.exchange, b.symbol.as_str()))
        });
        keys
    }

    /// Stop and discard every stream. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<StreamSlot<T>> = self
            .streams
            .write()
            .values_mut()
            .flat_map(|symbols| symbols.drain().map(|(_, slot)| slot))
            .collect();

        for slot in &drained {
            slot.connection.stop();
        }
        drained.len()
    }

    fn callbacks(&self, target: &StreamTarget) -> Result<SharedCallbacks<T>, StreamError> {
        let key = self.key(target)?;
        self.streams
            .read()
            .get(&key.exchange)
            .and_then(|symbols| symbols.get(&key.symbol))
            .map(|slot| Arc::clone(&slot.callbacks))
            .ok_or_else(|| StreamError::unknown(&key))
    }
}

impl<T> Drop for StreamRegistry<T> {
    fn drop(&mut self) {
        let closed = self.close_all();
        if closed > 0 {
            tracing::debug!(kind = %self.kind, closed, "Closed streams on drop");
        }
    }
}

/// Invoke every callback on a stream without holding its lock.
pub fn dispatch<T>(callbacks: &RwLock<CallbackList<T>>, key: &StreamKey, message: &T) -> DispatchOutcome {
    let snapshot = callbacks.read().clone();
    let outcome = snapshot.dispatch(message, key);
    metrics::record_callback_failures(key.kind, outcome.failed);
    outcome
}

// =============================================================================
// Tests
// =============================================================================

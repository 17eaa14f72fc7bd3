//! Ticker Manager
//!
//! Trade streams. Every trade decoded from the venue feed is forwarded to
//! the registered callbacks in registration order and, when requested,
//! appended to a JSON lines log file.

use std::path::PathBuf;
use std::sync::Arc;

use crate::application::error::StreamError;
use crate::application::services::registry::{StreamRegistry, StreamTarget, dispatch};
use crate::domain::streaming::{StreamKind, StreamMessage, TradeTick};
use crate::domain::subscription::{BoundArgs, CallbackId};
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::connection::{MessageHandler, StreamConnection};
use crate::infrastructure::events::EventHub;
use crate::infrastructure::exchanges::FeedRegistry;
use crate::infrastructure::tick_log::TickLog;

/// Options for [`TickerManager::create_ticker`].
#[derive(Debug, Clone, Default)]
pub struct TickerOptions {
    /// Exchange and symbol; omitted parts use the configured defaults.
    pub target: StreamTarget,
    /// Append every trade to this file as one JSON object per line.
    pub log: Option<PathBuf>,
    /// Register the stream without starting it.
    pub initially_stopped: bool,
    /// Arguments passed to the callback on every invocation.
    pub args: BoundArgs,
}

/// Manages ticker (trade) streams.
#[derive(Debug)]
pub struct TickerManager {
    registry: StreamRegistry<TradeTick>,
}

impl TickerManager {
    /// Create a manager with the built-in exchange feeds.
    #[must_use]
    pub fn new(settings: StreamSettings) -> Self {
        Self::with_feeds(settings, FeedRegistry::with_defaults())
    }

    /// Create a manager with a custom feed registry.
    #[must_use]
    pub fn with_feeds(settings: StreamSettings, feeds: FeedRegistry) -> Self {
        Self {
            registry: StreamRegistry::new(StreamKind::Ticker, Arc::new(settings), feeds),
        }
    }

    /// Open and start a ticker stream with `callback` as its first callback.
    ///
    /// Returns `Ok(None)` if the exchange is not supported. Re-creating an
    /// existing stream replaces it.
    ///
    /// # Errors
    ///
    /// `UnsupportedSymbolFormat` for a symbol the exchange cannot express,
    /// `LogSink` if the log file cannot be opened, `NoRuntime` if the
    /// stream should start outside a Tokio runtime.
    pub fn create_ticker<F>(
        &self,
        callback: F,
        options: TickerOptions,
    ) -> Result<Option<StreamConnection>, StreamError>
    where
        F: Fn(&TradeTick, &BoundArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let TickerOptions {
            target,
            log,
            initially_stopped,
            args,
        } = options;

        self.registry
            .open(&target, Arc::new(callback), args, initially_stopped, |key, callbacks| {
                let log = log
                    .map(|path| TickLog::open(path).map(Arc::new))
                    .transpose()
                    .map_err(StreamError::LogSink)?;

                let key = key.clone();
                let handler: MessageHandler = Arc::new(move |message: &StreamMessage| {
                    let StreamMessage::Trade(tick) = message else {
                        return;
                    };
                    if let Some(log) = &log
                        && let Err(e) = log.append(tick)
                    {
                        tracing::warn!(stream = %key, path = %log.path().display(), error = %e, "Failed to append trade to log");
                    }
                    dispatch(&callbacks, &key, tick);
                });
                Ok(handler)
            })
    }

    /// Append a callback to an existing ticker stream.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the stream was never created or has been closed.
    pub fn append_ticker_callback<F>(
        &self,
        callback: F,
        target: &StreamTarget,
        args: BoundArgs,
    ) -> Result<CallbackId, StreamError>
    where
        F: Fn(&TradeTick, &BoundArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.append_callback(target, Arc::new(callback), args)
    }

    /// Remove a callback. Returns `false` if it was not registered.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the stream does not exist.
    pub fn remove_ticker_callback(
        &self,
        target: &StreamTarget,
        id: CallbackId,
    ) -> Result<bool, StreamError> {
        self.registry.remove_callback(target, id)
    }

    /// Stop a ticker stream and drop its callbacks.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the stream does not exist.
    pub fn close_websocket(&self, target: &StreamTarget) -> Result<(), StreamError> {
        self.registry.close_websocket(target)
    }

    /// Connection handle for a ticker stream.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the stream does not exist, `ConnectionLost` if its
    /// session was lost. The handle stays reachable through
    /// [`StreamRegistry::connection`] for a restart.
    pub fn get_ticker(&self, target: &StreamTarget) -> Result<StreamConnection, StreamError> {
        self.registry.live_connection(target)
    }

    /// Connection events for every ticker stream.
    #[must_use]
    pub const fn events(&self) -> &EventHub {
        self.registry.events()
    }

    /// Underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &StreamRegistry<TradeTick> {
        &self.registry
    }
}

//! Stream manager errors.
//!
//! | Variant                   | Raised by                                  |
//! |---------------------------|--------------------------------------------|
//! | `UnsupportedExchange`     | target resolution, lookups                 |
//! | `UnsupportedSymbolFormat` | symbol translation                         |
//! | `UnknownStream`           | operations on a key never created          |
//! | `ConnectionLost`          | lookups of a stream whose session was lost |
//! | `NoRuntime`               | starting a stream outside Tokio            |
//! | `Feed`                    | handshake construction                     |
//! | `LogSink`                 | ticker log file could not be opened        |
//!
//! The create operations treat `UnsupportedExchange` as a soft failure: they
//! log it and return `Ok(None)` instead.

use std::io;

use thiserror::Error;

use crate::application::ports::FeedError;
use crate::domain::streaming::{StreamKey, StreamKind};
use crate::domain::symbol::{Exchange, SymbolError};

/// Errors returned by the registry and the stream managers.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Exchange name is unknown or has no registered feed.
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    /// Symbol does not match the shape the exchange expects.
    #[error(transparent)]
    UnsupportedSymbolFormat(SymbolError),

    /// No stream exists for the key.
    #[error("no {kind} stream for {symbol} on {exchange}")]
    UnknownStream {
        /// Exchange of the missing stream.
        exchange: Exchange,
        /// Canonical symbol of the missing stream.
        symbol: String,
        /// Stream kind.
        kind: StreamKind,
    },

    /// The network connection for a stream was lost.
    #[error("connection lost for {key}: {reason}")]
    ConnectionLost {
        /// Affected stream.
        key: StreamKey,
        /// Cause reported by the connection.
        reason: String,
    },

    /// The stream should start but there is no Tokio runtime to run it on.
    #[error("cannot start {0}: no Tokio runtime")]
    NoRuntime(StreamKey),

    /// The venue adapter failed to encode or decode a message.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// The ticker log sink could not be opened.
    #[error("log sink error: {0}")]
    LogSink(#[source] io::Error),
}

impl StreamError {
    /// Build an `UnknownStream` error for a key.
    #[must_use]
    pub fn unknown(key: &StreamKey) -> Self {
        Self::UnknownStream {
            exchange: key.exchange,
            symbol: key.symbol.clone(),
            kind: key.kind,
        }
    }

    /// Whether the error means the stream does not exist.
    #[must_use]
    pub const fn is_unknown_stream(&self) -> bool {
        matches!(self, Self::UnknownStream { .. })
    }
}

impl From<SymbolError> for StreamError {
    fn from(err: SymbolError) -> Self {
        match err {
            SymbolError::UnknownExchange(name) => Self::UnsupportedExchange(name),
            other @ SymbolError::UnsupportedFormat { .. } => Self::UnsupportedSymbolFormat(other),
        }
    }
}

//! Exchange Feed Port (Driven Port)
//!
//! Interface a venue adapter implements so a stream connection can build its
//! endpoint, send the subscription handshake and normalize inbound frames.

use std::fmt;

use crate::domain::streaming::{StreamKind, StreamMessage};
use crate::domain::symbol::Exchange;
use crate::infrastructure::config::ExchangeSettings;

/// What a connection is subscribing to.
#[derive(Debug, Clone, Copy)]
pub struct FeedContext<'a> {
    /// Stream kind.
    pub kind: StreamKind,
    /// Canonical symbol.
    pub symbol: &'a str,
    /// Venue-native symbol.
    pub exchange_symbol: &'a str,
}

/// Errors raised while encoding or decoding venue messages.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Frame was not valid JSON for the venue schema.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame parsed but did not have the expected shape.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// A numeric field could not be parsed.
    #[error("invalid number in `{field}`: {value}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// The venue reported an error on the stream.
    #[error("upstream error{}: {message}", error_code(.code))]
    Upstream {
        /// Venue error code, if any.
        code: Option<i64>,
        /// Venue error message.
        message: String,
    },
}

#[allow(clippy::ref_option, clippy::trivially_copy_pass_by_ref)]
fn error_code(code: &Option<i64>) -> String {
    code.map(|c| format!(" {c}")).unwrap_or_default()
}

/// Port implemented by each venue adapter.
pub trait ExchangeFeed: Send + Sync + fmt::Debug {
    /// Venue served by this adapter.
    fn exchange(&self) -> Exchange;

    /// WebSocket URL for a subscription.
    fn endpoint(&self, ctx: &FeedContext<'_>, venue: &ExchangeSettings, sandbox: bool) -> String;

    /// Text frames to send, in order, right after connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame cannot be encoded.
    fn handshake(
        &self,
        ctx: &FeedContext<'_>,
        venue: &ExchangeSettings,
    ) -> Result<Vec<String>, FeedError>;

    /// Decode one inbound text frame into zero or more normalized messages.
    ///
    /// Control messages and messages for other symbols decode to nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed or reports a venue error.
    fn decode(&self, ctx: &FeedContext<'_>, text: &str) -> Result<Vec<StreamMessage>, FeedError>;
}

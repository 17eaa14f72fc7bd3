//! Market Data Streaming Types
//!
//! Core domain types for market data: trade ticks and order book updates.
//! These types are codec-agnostic and represent the canonical internal
//! representation every venue adapter normalizes into.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::symbol::Exchange;

// =============================================================================
// Stream Kind
// =============================================================================

/// Kind of market data carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Trade ticks.
    Ticker,
    /// Order book updates.
    Orderbook,
}

impl StreamKind {
    /// Get the stream kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Orderbook => "orderbook",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stream Key
// =============================================================================

/// Identifies one live subscription: (exchange, canonical symbol, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    /// Exchange the stream is connected to.
    pub exchange: Exchange,
    /// Canonical `BASE-QUOTE` symbol.
    pub symbol: String,
    /// Stream kind.
    pub kind: StreamKind,
}

impl StreamKey {
    /// Create a new stream key.
    #[must_use]
    pub fn new(exchange: Exchange, symbol: impl Into<String>, kind: StreamKind) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
            kind,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.kind)
    }
}

// =============================================================================
// Price Levels
// =============================================================================

/// Order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy side.
    Bid,
    /// Sell side.
    Ask,
}

/// A single aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Aggregate size resting at this price.
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    #[must_use]
    pub const fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, size): (Decimal, Decimal)) -> Self {
        Self::new(price, size)
    }
}

// =============================================================================
// Normalized Messages
// =============================================================================

/// Aggressor side of a trade, when the venue reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Buyer was the taker.
    Buy,
    /// Seller was the taker.
    Sell,
}

/// A single executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTick {
    /// Venue the trade printed on.
    pub exchange: Exchange,
    /// Canonical symbol.
    pub symbol: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed size.
    pub size: Decimal,
    /// Venue trade identifier.
    pub trade_id: String,
    /// Execution time reported by the venue.
    pub time: DateTime<Utc>,
    /// Taker side, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<TradeSide>,
}

/// Change of a single price level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDelta {
    /// Canonical symbol.
    pub symbol: String,
    /// Side the level belongs to.
    pub side: Side,
    /// Level price.
    pub price: Decimal,
    /// New aggregate size; zero removes the level.
    pub size: Decimal,
}

/// Replacement of both sides of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookReplace {
    /// Canonical symbol.
    pub symbol: String,
    /// New bid levels, in any order.
    pub bids: Vec<PriceLevel>,
    /// New ask levels, in any order.
    pub asks: Vec<PriceLevel>,
}

/// A decoded message delivered by a stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Executed trade.
    Trade(TradeTick),
    /// Level changes from one wire message, applied together.
    BookDeltas(Vec<BookDelta>),
    /// Full replacement of the book.
    BookReplace(BookReplace),
}

impl StreamMessage {
    /// Canonical symbol the message refers to, if it carries one.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Trade(tick) => Some(&tick.symbol),
            Self::BookDeltas(deltas) => deltas.first().map(|d| d.symbol.as_str()),
            Self::BookReplace(replace) => Some(&replace.symbol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_display() {
        let key = StreamKey::new(Exchange::CoinbasePro, "BTC-USD", StreamKind::Orderbook);
        assert_eq!(key.to_string(), "coinbase_pro:BTC-USD:orderbook");
    }

    #[test]
    fn trade_tick_serializes_expected_fields() {
        let tick = TradeTick {
            exchange: Exchange::Alpaca,
            symbol: "AAPL-USD".to_string(),
            price: Decimal::new(12655, 2),
            size: Decimal::ONE,
            trade_id: "96921".to_string(),
            time: Utc::now(),
            side: None,
        };

        let value = serde_json::to_value(&tick).unwrap();
        for field in ["symbol", "price", "size", "trade_id", "time"] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert!(value.get("side").is_none());
    }

    #[test]
    fn empty_deltas_have_no_symbol() {
        assert!(StreamMessage::BookDeltas(vec![]).symbol().is_none());
    }
}

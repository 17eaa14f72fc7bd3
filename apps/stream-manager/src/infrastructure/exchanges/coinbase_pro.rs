//! Coinbase Pro WebSocket Feed
//!
//! # Stream URL
//!
//! - Production: `wss://ws-feed.pro.coinbase.com`
//! - Sandbox: `wss://ws-feed-public.sandbox.pro.coinbase.com`
//!
//! # Protocol
//!
//! A single subscribe frame selects products and channels. Every inbound
//! frame is one JSON object tagged by `type`:
//!
//! | `type`                 | Normalized as  |
//! |------------------------|----------------|
//! | `match`, `last_match`  | `Trade`        |
//! | `snapshot`             | `BookReplace`  |
//! | `l2update`             | `BookDeltas`   |
//! | `error`                | `FeedError::Upstream` |
//! | anything else          | ignored        |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::{ExchangeFeed, FeedContext, FeedError};
use crate::domain::streaming::{
    BookDelta, BookReplace, PriceLevel, Side, StreamKind, StreamMessage, TradeSide, TradeTick,
};
use crate::domain::symbol::Exchange;
use crate::infrastructure::config::ExchangeSettings;

// =============================================================================
// Wire Messages
// =============================================================================

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    product_ids: [&'a str; 1],
    channels: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CoinbaseMessage {
    #[serde(alias = "last_match")]
    Match(MatchMessage),
    Snapshot(SnapshotMessage),
    #[serde(rename = "l2update")]
    L2Update(L2UpdateMessage),
    Error(ErrorMessage),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MatchMessage {
    trade_id: u64,
    product_id: String,
    price: Decimal,
    size: Decimal,
    /// Side of the resting (maker) order.
    side: String,
    time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SnapshotMessage {
    product_id: String,
    bids: Vec<[Decimal; 2]>,
    asks: Vec<[Decimal; 2]>,
}

#[derive(Debug, Deserialize)]
struct L2UpdateMessage {
    product_id: String,
    changes: Vec<(String, Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
    #[serde(default)]
    reason: Option<String>,
}

// =============================================================================
// Feed
// =============================================================================

/// Coinbase Pro adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoinbaseProFeed;

impl ExchangeFeed for CoinbaseProFeed {
    fn exchange(&self) -> Exchange {
        Exchange::CoinbasePro
    }

    fn endpoint(&self, _ctx: &FeedContext<'_>, venue: &ExchangeSettings, sandbox: bool) -> String {
        venue.base_url(sandbox)
    }

    fn handshake(
        &self,
        ctx: &FeedContext<'_>,
        venue: &ExchangeSettings,
    ) -> Result<Vec<String>, FeedError> {
        let channel = match ctx.kind {
            StreamKind::Ticker => venue.ticker_channel.as_str(),
            StreamKind::Orderbook => venue.orderbook_channel.as_str(),
        };
        let request = SubscribeRequest {
            kind: "subscribe",
            product_ids: [ctx.exchange_symbol],
            channels: [channel],
        };
        Ok(vec![serde_json::to_string(&request)?])
    }

    fn decode(&self, ctx: &FeedContext<'_>, text: &str) -> Result<Vec<StreamMessage>, FeedError> {
        let message = match serde_json::from_str::<CoinbaseMessage>(text)? {
            CoinbaseMessage::Match(m) if m.product_id == ctx.exchange_symbol => {
                StreamMessage::Trade(TradeTick {
                    exchange: Exchange::CoinbasePro,
                    symbol: ctx.symbol.to_string(),
                    price: m.price,
                    size: m.size,
                    trade_id: m.trade_id.to_string(),
                    time: m.time,
                    side: taker_side(&m.side),
                })
            }
            CoinbaseMessage::Snapshot(s) if s.product_id == ctx.exchange_symbol => {
                StreamMessage::BookReplace(BookReplace {
                    symbol: ctx.symbol.to_string(),
                    bids: levels(&s.bids),
                    asks: levels(&s.asks),
                })
            }
            CoinbaseMessage::L2Update(u) if u.product_id == ctx.exchange_symbol => {
                let deltas = u
                    .changes
                    .into_iter()
                    .map(|(side, price, size)| {
                        Ok(BookDelta {
                            symbol: ctx.symbol.to_string(),
                            side: book_side(&side)?,
                            price,
                            size,
                        })
                    })
                    .collect::<Result<Vec<_>, FeedError>>()?;
                StreamMessage::BookDeltas(deltas)
            }
            CoinbaseMessage::Error(e) => {
                let message = match e.reason {
                    Some(reason) => format!("{}: {reason}", e.message),
                    None => e.message,
                };
                return Err(FeedError::Upstream {
                    code: None,
                    message,
                });
            }
            _ => return Ok(Vec::new()),
        };
        Ok(vec![message])
    }
}

fn levels(raw: &[[Decimal; 2]]) -> Vec<PriceLevel> {
    raw.iter()
        .map(|[price, size]| PriceLevel::new(*price, *size))
        .collect()
}

fn book_side(side: &str) -> Result<Side, FeedError> {
    match side {
        "buy" => Ok(Side::Bid),
        "sell" => Ok(Side::Ask),
        other => Err(FeedError::InvalidFormat(format!(
            "unknown l2update side `{other}`"
        ))),
    }
}

/// The maker side is reported; the taker is on the other side.
fn taker_side(maker: &str) -> Option<TradeSide> {
    match maker {
        "buy" => Some(TradeSide::Sell),
        "sell" => Some(TradeSide::Buy),
        _ => None,
    }
}

//! Binance Raw Stream Feed
//!
//! Binance selects the stream through the URL path, so no handshake frames
//! are sent:
//!
//! ```text
//! wss://stream.binance.com:9443/ws/btcusdt@trade
//! wss://stream.binance.com:9443/ws/btcusdt@depth@100ms
//! ```
//!
//! Inbound events carry their type in `e`. Partial depth payloads have no
//! event type and are recognized by `lastUpdateId`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::application::ports::{ExchangeFeed, FeedContext, FeedError};
use crate::domain::streaming::{
    BookDelta, BookReplace, PriceLevel, Side, StreamKind, StreamMessage, TradeSide, TradeTick,
};
use crate::domain::symbol::Exchange;
use crate::infrastructure::config::ExchangeSettings;

// =============================================================================
// Wire Messages
// =============================================================================

#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct DepthUpdateEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bids: Vec<[Decimal; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[Decimal; 2]>,
}

#[derive(Debug, Deserialize)]
struct PartialDepth {
    bids: Vec<[Decimal; 2]>,
    asks: Vec<[Decimal; 2]>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    code: i64,
    msg: String,
}

// =============================================================================
// Feed
// =============================================================================

/// Binance spot adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceFeed;

impl ExchangeFeed for BinanceFeed {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn endpoint(&self, ctx: &FeedContext<'_>, venue: &ExchangeSettings, sandbox: bool) -> String {
        let channel = match ctx.kind {
            StreamKind::Ticker => &venue.ticker_channel,
            StreamKind::Orderbook => &venue.orderbook_channel,
        };
        let base = venue.base_url(sandbox);
        format!(
            "{}/{}@{channel}",
            base.trim_end_matches('/'),
            ctx.exchange_symbol.to_lowercase()
        )
    }

    fn handshake(
        &self,
        _ctx: &FeedContext<'_>,
        _venue: &ExchangeSettings,
    ) -> Result<Vec<String>, FeedError> {
        Ok(Vec::new())
    }

    fn decode(&self, ctx: &FeedContext<'_>, text: &str) -> Result<Vec<StreamMessage>, FeedError> {
        let value: Value = serde_json::from_str(text)?;

        match value.get("e").and_then(Value::as_str) {
            Some("trade") => {
                let event: TradeEvent = serde_json::from_value(value)?;
                if !event.symbol.eq_ignore_ascii_case(ctx.exchange_symbol) {
                    return Ok(Vec::new());
                }
                let time = DateTime::<Utc>::from_timestamp_millis(event.trade_time).ok_or_else(
                    || FeedError::InvalidNumber {
                        field: "T",
                        value: event.trade_time.to_string(),
                    },
                )?;
                let side = if event.buyer_is_maker {
                    TradeSide::Sell
                } else {
                    TradeSide::Buy
                };
                Ok(vec![StreamMessage::Trade(TradeTick {
                    exchange: Exchange::Binance,
                    symbol: ctx.symbol.to_string(),
                    price: event.price,
                    size: event.quantity,
                    trade_id: event.trade_id.to_string(),
                    time,
                    side: Some(side),
                })])
            }
            Some("depthUpdate") => {
                let event: DepthUpdateEvent = serde_json::from_value(value)?;
                if !event.symbol.eq_ignore_ascii_case(ctx.exchange_symbol) {
                    return Ok(Vec::new());
                }
                let deltas = deltas(ctx.symbol, Side::Bid, &event.bids)
                    .chain(deltas(ctx.symbol, Side::Ask, &event.asks))
                    .collect();
                Ok(vec![StreamMessage::BookDeltas(deltas)])
            }
            Some(_) => Ok(Vec::new()),
            None if value.get("lastUpdateId").is_some() => {
                let depth: PartialDepth = serde_json::from_value(value)?;
                Ok(vec![StreamMessage::BookReplace(BookReplace {
                    symbol: ctx.symbol.to_string(),
                    bids: levels(&depth.bids),
                    asks: levels(&depth.asks),
                })])
            }
            None if value.get("code").is_some() && value.get("msg").is_some() => {
                let error: ErrorPayload = serde_json::from_value(value)?;
                Err(FeedError::Upstream {
                    code: Some(error.code),
                    message: error.msg,
                })
            }
            None => Ok(Vec::new()),
        }
    }
}

fn levels(raw: &[[Decimal; 2]]) -> Vec<PriceLevel> {
    raw.iter()
        .map(|[price, size]| PriceLevel::new(*price, *size))
        .collect()
}

fn deltas<'a>(
    symbol: &'a str,
    side: Side,
    raw: &'a [[Decimal; 2]],
) -> impl Iterator<Item = BookDelta> + 'a {
    raw.iter().map(move |[price, size]| BookDelta {
        symbol: symbol.to_string(),
        side,
        price: *price,
        size: *size,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn ctx(kind: StreamKind) -> FeedContext<'static> {
        FeedContext {
            kind,
            symbol: "BTC-USDT",
            exchange_symbol: "BTCUSDT",
        }
    }

    #[test]
    fn endpoint_encodes_stream_in_path() {
        let venue = ExchangeSettings::for_exchange(Exchange::Binance);
        assert_eq!(
            BinanceFeed.endpoint(&ctx(StreamKind::Ticker), &venue, false),
            "wss://stream.binance.com:9443/ws/btcusdt@trade"
        );
        assert_eq!(
            BinanceFeed.endpoint(&ctx(StreamKind::Orderbook), &venue, true),
            "wss://testnet.binance.vision/ws/btcusdt@depth@100ms"
        );
        assert!(
            BinanceFeed
                .handshake(&ctx(StreamKind::Ticker), &venue)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn decodes_trade() {
        let text = r#"{"e":"trade","E":1672515782136,"s":"BTCUSDT","t":12345,"p":"0.001","q":"100",
            "b":88,"a":50,"T":1672515782136,"m":true,"M":true}"#;
        let messages = BinanceFeed.decode(&ctx(StreamKind::Ticker), text).unwrap();
        let [StreamMessage::Trade(tick)] = messages.as_slice() else {
            panic!("expected one trade, got {messages:?}");
        };
        assert_eq!(tick.symbol, "BTC-USDT");
        assert_eq!(tick.price, dec!(0.001));
        assert_eq!(tick.size, dec!(100));
        assert_eq!(tick.trade_id, "12345");
        assert_eq!(tick.side, Some(TradeSide::Sell));
        assert_eq!(tick.time.timestamp_millis(), 1_672_515_782_136);
    }

    #[test]
    fn decodes_depth_update() {
        let text = r#"{"e":"depthUpdate","E":1672515782136,"s":"BTCUSDT","U":157,"u":160,
            "b":[["0.0024","10"]],"a":[["0.0026","100"],["0.0027","0"]]}"#;
        let messages = BinanceFeed.decode(&ctx(StreamKind::Orderbook), text).unwrap();
        let [StreamMessage::BookDeltas(deltas)] = messages.as_slice() else {
            panic!("expected deltas, got {messages:?}");
        };
        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas[0].side, Side::Bid);
        assert_eq!(deltas[0].price, dec!(0.0024));
        assert_eq!(deltas[2].side, Side::Ask);
        assert_eq!(deltas[2].size, Decimal::ZERO);
    }

    #[test]
    fn partial_depth_replaces_book() {
        let text = r#"{"lastUpdateId":160,"bids":[["0.0024","10"]],"asks":[["0.0026","100"]]}"#;
        let messages = BinanceFeed.decode(&ctx(StreamKind::Orderbook), text).unwrap();
        assert_eq!(
            messages,
            vec![StreamMessage::BookReplace(BookReplace {
                symbol: "BTC-USDT".to_string(),
                bids: vec![PriceLevel::new(dec!(0.0024), dec!(10))],
                asks: vec![PriceLevel::new(dec!(0.0026), dec!(100))],
            })]
        );
    }

    #[test]
    fn errors_and_unknown_payloads() {
        let err = BinanceFeed
            .decode(&ctx(StreamKind::Ticker), r#"{"code":2,"msg":"Invalid request"}"#)
            .unwrap_err();
        assert!(matches!(err, FeedError::Upstream { code: Some(2), .. }));

        for text in [
            r#"{"result":null,"id":1}"#,
            r#"{"e":"aggTrade","s":"BTCUSDT"}"#,
            r#"{"e":"trade","s":"ETHUSDT","t":1,"p":"1","q":"1","T":1,"m":false}"#,
        ] {
            assert!(BinanceFeed.decode(&ctx(StreamKind::Ticker), text).unwrap().is_empty());
        }
    }
}

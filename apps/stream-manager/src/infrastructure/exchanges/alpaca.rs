//! Alpaca Market Data Feed
//!
//! Connects to Alpaca's v2 stock data stream.
//!
//! # Stream URL
//!
//! - Production: `wss://stream.data.alpaca.markets/v2/{stream}`
//! - Sandbox: `wss://paper-api.alpaca.markets/stream/v2/{stream}`
//!
//! where `{stream}` is the configured data stream (`iex` or `sip`).
//!
//! # Protocol
//!
//! The client authenticates (when credentials are configured) and then
//! subscribes to `trades` or `quotes` for one symbol. Inbound frames are
//! JSON arrays of objects tagged by `T`, decoded one element at a time so a
//! malformed element does not drop its neighbours. Alpaca only publishes the
//! top of book, so each quote replaces the whole mirrored book.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::application::ports::{ExchangeFeed, FeedContext, FeedError};
use crate::domain::streaming::{
    BookReplace, PriceLevel, StreamKind, StreamMessage, TradeTick,
};
use crate::domain::symbol::Exchange;
use crate::infrastructure::config::ExchangeSettings;

// =============================================================================
// Wire Messages
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "T")]
enum AlpacaMessage {
    #[serde(rename = "t")]
    Trade(TradeMessage),
    #[serde(rename = "q")]
    Quote(QuoteMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct TradeMessage {
    #[serde(rename = "S")]
    symbol: String,
    #[serde(rename = "i")]
    trade_id: i64,
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "s")]
    size: Decimal,
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct QuoteMessage {
    #[serde(rename = "S")]
    symbol: String,
    #[serde(rename = "bp")]
    bid_price: Decimal,
    #[serde(rename = "bs")]
    bid_size: Decimal,
    #[serde(rename = "ap")]
    ask_price: Decimal,
    #[serde(rename = "as")]
    ask_size: Decimal,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    code: i64,
    msg: String,
}

// =============================================================================
// Feed
// =============================================================================

/// Alpaca stock data adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlpacaFeed;

impl ExchangeFeed for AlpacaFeed {
    fn exchange(&self) -> Exchange {
        Exchange::Alpaca
    }

    fn endpoint(&self, _ctx: &FeedContext<'_>, venue: &ExchangeSettings, sandbox: bool) -> String {
        venue.base_url(sandbox)
    }

    fn handshake(
        &self,
        ctx: &FeedContext<'_>,
        venue: &ExchangeSettings,
    ) -> Result<Vec<String>, FeedError> {
        let mut frames = Vec::with_capacity(2);

        if let Some(credentials) = &venue.credentials {
            let auth = json!({
                "action": "auth",
                "key": credentials.api_key(),
                "secret": credentials.api_secret(),
            });
            frames.push(serde_json::to_string(&auth)?);
        }

        let channel = match ctx.kind {
            StreamKind::Ticker => &venue.ticker_channel,
            StreamKind::Orderbook => &venue.orderbook_channel,
        };
        let mut subscribe = Map::new();
        subscribe.insert("action".to_string(), Value::from("subscribe"));
        subscribe.insert(channel.clone(), json!([ctx.exchange_symbol]));
        frames.push(serde_json::to_string(&subscribe)?);

        Ok(frames)
    }

    fn decode(&self, ctx: &FeedContext<'_>, text: &str) -> Result<Vec<StreamMessage>, FeedError> {
        let trimmed = text.trim();
        if !trimmed.starts_with(['[', '{']) {
            return Err(FeedError::InvalidFormat(format!(
                "expected JSON array or object, got: {}",
                trimmed.chars().take(50).collect::<String>()
            )));
        }
        let elements = match serde_json::from_str::<Value>(trimmed)? {
            Value::Array(elements) => elements,
            object => vec![object],
        };

        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            let message = match serde_json::from_value::<AlpacaMessage>(element) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(symbol = ctx.exchange_symbol, error = %e, "Skipping malformed Alpaca message");
                    continue;
                }
            };
            match message {
                AlpacaMessage::Trade(t) if t.symbol == ctx.exchange_symbol => {
                    out.push(StreamMessage::Trade(TradeTick {
                        exchange: Exchange::Alpaca,
                        symbol: ctx.symbol.to_string(),
                        price: t.price,
                        size: t.size,
                        trade_id: t.trade_id.to_string(),
                        time: t.timestamp,
                        side: None,
                    }));
                }
                AlpacaMessage::Quote(q) if q.symbol == ctx.exchange_symbol => {
                    out.push(StreamMessage::BookReplace(BookReplace {
                        symbol: ctx.symbol.to_string(),
                        bids: vec![PriceLevel::new(q.bid_price, q.bid_size)],
                        asks: vec![PriceLevel::new(q.ask_price, q.ask_size)],
                    }));
                }
                AlpacaMessage::Error(e) => {
                    return Err(FeedError::Upstream {
                        code: Some(e.code),
                        message: e.msg,
                    });
                }
                _ => {}
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::infrastructure::config::Credentials;

    fn ctx(kind: StreamKind) -> FeedContext<'static> {
        FeedContext {
            kind,
            symbol: "AAPL-USD",
            exchange_symbol: "AAPL",
        }
    }

    #[test]
    fn handshake_without_credentials_only_subscribes() {
        let venue = ExchangeSettings::for_exchange(Exchange::Alpaca);
        let frames = AlpacaFeed.handshake(&ctx(StreamKind::Ticker), &venue).unwrap();
        assert_eq!(frames.len(), 1);
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value, json!({"action": "subscribe", "trades": ["AAPL"]}));
    }

    #[test]
    fn handshake_authenticates_first() {
        let mut venue = ExchangeSettings::for_exchange(Exchange::Alpaca);
        venue.credentials = Some(Credentials::new("key".to_string(), "secret".to_string()));

        let frames = AlpacaFeed.handshake(&ctx(StreamKind::Orderbook), &venue).unwrap();

        assert_eq!(frames.len(), 2);
        let auth: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(auth, json!({"action": "auth", "key": "key", "secret": "secret"}));
        let sub: Value = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(sub, json!({"action": "subscribe", "quotes": ["AAPL"]}));
    }

    #[test]
    fn decodes_trade() {
        let text = r#"[{"T":"t","S":"AAPL","i":96921,"x":"D","p":126.5,"s":1,"t":"2021-02-22T15:51:44.208Z","c":["@","I"],"z":"C"}]"#;
        let messages = AlpacaFeed.decode(&ctx(StreamKind::Ticker), text).unwrap();
        let [StreamMessage::Trade(tick)] = messages.as_slice() else {
            panic!("expected one trade, got {messages:?}");
        };
        assert_eq!(tick.symbol, "AAPL-USD");
        assert_eq!(tick.price, dec!(126.5));
        assert_eq!(tick.size, dec!(1));
        assert_eq!(tick.trade_id, "96921");
    }

    #[test]
    fn quote_replaces_top_of_book() {
        let text = r#"[{"T":"q","S":"AAPL","bx":"U","bp":126.5,"bs":3,"ax":"Q","ap":126.75,"as":2,"t":"2021-02-22T15:51:45.335Z","c":["R"],"z":"C"}]"#;
        let messages = AlpacaFeed.decode(&ctx(StreamKind::Orderbook), text).unwrap();
        assert_eq!(
            messages,
            vec![StreamMessage::BookReplace(BookReplace {
                symbol: "AAPL-USD".to_string(),
                bids: vec![PriceLevel::new(dec!(126.5), dec!(3))],
                asks: vec![PriceLevel::new(dec!(126.75), dec!(2))],
            })]
        );
    }

    #[test]
    fn control_and_foreign_messages_are_ignored() {
        let text = r#"[{"T":"success","msg":"connected"},{"T":"subscription","trades":["AAPL"]},
            {"T":"t","S":"MSFT","i":1,"p":1,"s":1,"t":"2021-02-22T15:51:44.208Z"}]"#;
        assert!(AlpacaFeed.decode(&ctx(StreamKind::Ticker), text).unwrap().is_empty());
    }

    #[test]
    fn error_is_upstream() {
        let text = r#"[{"T":"error","code":402,"msg":"auth failed"}]"#;
        let err = AlpacaFeed.decode(&ctx(StreamKind::Ticker), text).unwrap_err();
        assert!(matches!(err, FeedError::Upstream { code: Some(402), .. }));
    }

    #[test]
    fn malformed_element_does_not_drop_its_neighbours() {
        let text = r#"[{"T":"t","S":"AAPL","i":1,"p":126.5,"s":1,"t":"2021-02-22T15:51:44.208Z"},
            {"T":"t","S":"AAPL","i":"not-a-number","p":"oops"},
            {"T":"q","S":"AAPL","bp":126.5,"bs":3,"ap":126.75,"as":2}]"#;

        let messages = AlpacaFeed.decode(&ctx(StreamKind::Ticker), text).unwrap();

        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], StreamMessage::Trade(t) if t.trade_id == "1"));
        assert!(matches!(&messages[1], StreamMessage::BookReplace(_)));
    }

    #[test]
    fn truncated_frame_is_a_json_error() {
        let err = AlpacaFeed
            .decode(&ctx(StreamKind::Ticker), r#"[{"T":"t","S":"AAPL""#)
            .unwrap_err();
        assert!(matches!(err, FeedError::Json(_)));
    }

    #[test]
    fn single_object_and_garbage() {
        let single = r#"{"T":"success","msg":"authenticated"}"#;
        assert!(AlpacaFeed.decode(&ctx(StreamKind::Ticker), single).unwrap().is_empty());
        assert!(matches!(
            AlpacaFeed.decode(&ctx(StreamKind::Ticker), "hello"),
            Err(FeedError::InvalidFormat(_))
        ));
    }
}

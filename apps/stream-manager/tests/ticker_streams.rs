//! Ticker Stream Integration Tests
//!
//! Drives `TickerManager` against a local WebSocket server speaking the
//! venue wire formats.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use common::{Then, connection_lost, next, settings_for, spawn_server};
use stream_manager::{
    BoundArgs, Credentials, Exchange, StreamError, StreamTarget, TickerManager, TickerOptions,
    TradeSide, TradeTick,
};

fn forward(
    tx: mpsc::UnboundedSender<(TradeTick, BoundArgs)>,
) -> impl Fn(&TradeTick, &BoundArgs) -> anyhow::Result<()> + Send + Sync + 'static {
    move |tick: &TradeTick, args: &BoundArgs| -> anyhow::Result<()> {
        tx.send((tick.clone(), args.clone()))?;
        Ok(())
    }
}

#[tokio::test]
async fn alpaca_authenticates_then_subscribes() {
    let mut server = spawn_server(
        2,
        vec![
            r#"[{"T":"success","msg":"authenticated"}]"#.to_string(),
            r#"[{"T":"subscription","trades":["AAPL"],"quotes":[],"bars":[]}]"#.to_string(),
            r#"[{"T":"t","S":"AAPL","i":52983525029461,"x":"V","p":187.25,"s":100,"t":"2024-01-02T15:30:00.123Z","c":["@"],"z":"C"}]"#
                .to_string(),
        ],
        Then::Close,
    )
    .await;

    let mut settings = settings_for(Exchange::Alpaca, &server.url);
    settings.alpaca.credentials = Some(Credentials::new("PK123".to_string(), "s3cr3t".to_string()));
    let manager = TickerManager::new(settings);
    let mut events = manager.events().subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager
        .create_ticker(
            forward(tx),
            TickerOptions {
                target: StreamTarget::new("alpaca", "AAPL"),
                args: BoundArgs::new().with("account", "paper"),
                ..TickerOptions::default()
            },
        )
        .unwrap()
        .unwrap();

    let auth: serde_json::Value = serde_json::from_str(&next(&mut server.received).await).unwrap();
    assert_eq!(
        auth,
        serde_json::json!({"action": "auth", "key": "PK123", "secret": "s3cr3t"})
    );
    let subscribe: serde_json::Value =
        serde_json::from_str(&next(&mut server.received).await).unwrap();
    assert_eq!(
        subscribe,
        serde_json::json!({"action": "subscribe", "trades": ["AAPL"]})
    );

    let (tick, args) = next(&mut rx).await;
    assert_eq!(tick.exchange, Exchange::Alpaca);
    assert_eq!(tick.symbol, "AAPL-USD");
    assert_eq!(tick.price, dec!(187.25));
    assert_eq!(tick.size, dec!(100));
    assert_eq!(args.get_str("account"), Some("paper"));

    let reason = connection_lost(&mut events).await;
    assert!(!reason.is_empty());

    let target = StreamTarget::new("alpaca", "AAPL");
    let err = assert_err!(manager.get_ticker(&target));
    assert!(
        matches!(err, StreamError::ConnectionLost { ref key, reason: ref lost } if key.symbol == "AAPL-USD" && *lost == reason)
    );
    // The handle stays registered so the owner can restart it.
    assert!(!manager.registry().connection(&target).unwrap().is_running());
}

#[tokio::test]
async fn coinbase_trades_are_logged_one_line_each() {
    let server = spawn_server(
        1,
        vec![
            r#"{"type":"last_match","trade_id":1,"product_id":"ETH-USD","price":"2000.10","size":"0.5","side":"buy","time":"2024-01-02T15:30:00.000001Z"}"#
                .to_string(),
            r#"{"type":"heartbeat","sequence":2,"last_trade_id":1,"product_id":"ETH-USD","time":"2024-01-02T15:30:01Z"}"#
                .to_string(),
            r#"{"type":"match","trade_id":2,"product_id":"ETH-USD","price":"2000.20","size":"1.5","side":"sell","time":"2024-01-02T15:30:02Z"}"#
                .to_string(),
        ],
        Then::Hold,
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eth-usd.jsonl");
    let manager = TickerManager::new(settings_for(Exchange::CoinbasePro, &server.url));
    let target = StreamTarget::new("coinbase_pro", "ETH-USD");
    let (tx, mut rx) = mpsc::unbounded_channel();

    manager
        .create_ticker(
            forward(tx),
            TickerOptions {
                target: target.clone(),
                log: Some(path.clone()),
                ..TickerOptions::default()
            },
        )
        .unwrap()
        .unwrap();

    let (first, _) = next(&mut rx).await;
    let (second, _) = next(&mut rx).await;
    assert_eq!(first.side, Some(TradeSide::Sell));
    assert_eq!(second.side, Some(TradeSide::Buy));

    let contents = std::fs::read_to_string(&path).unwrap();
    let logged: Vec<TradeTick> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(logged, vec![first, second]);

    assert_ok!(manager.close_websocket(&target));
    assert!(manager.get_ticker(&target).unwrap_err().is_unknown_stream());
}

#[tokio::test]
async fn binance_trade_stream_needs_no_handshake() {
    let server = spawn_server(
        0,
        vec![
            r#"{"e":"trade","E":1704209400000,"s":"BTCUSDT","t":42,"p":"42000.50","q":"0.010","T":1704209400000,"m":false,"M":true}"#
                .to_string(),
        ],
        Then::Hold,
    )
    .await;

    let manager = TickerManager::new(settings_for(Exchange::Binance, &server.url));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let connection = manager
        .create_ticker(
            forward(tx),
            TickerOptions {
                target: StreamTarget::new("binance", "BTC-USDT"),
                ..TickerOptions::default()
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(connection.url(), format!("{}/btcusdt@trade", server.url));

    let (tick, _) = next(&mut rx).await;
    assert_eq!(tick.symbol, "BTC-USDT");
    assert_eq!(tick.trade_id, "42");
    assert_eq!(tick.price, dec!(42000.50));
    assert_eq!(tick.side, Some(TradeSide::Buy));
}

#[tokio::test]
async fn recreating_a_ticker_replaces_the_connection() {
    let first_server = spawn_server(1, Vec::new(), Then::Hold).await;
    let manager = TickerManager::new(settings_for(Exchange::CoinbasePro, &first_server.url));
    let noop = |_: &TradeTick, _: &BoundArgs| -> anyhow::Result<()> { Ok(()) };

    let first = manager
        .create_ticker(noop, TickerOptions::default())
        .unwrap()
        .unwrap();
    let second = manager
        .create_ticker(noop, TickerOptions::default())
        .unwrap()
        .unwrap();

    assert!(!first.is_running());
    assert!(second.is_running());
    assert_eq!(
        manager.get_ticker(&StreamTarget::default()).unwrap().id(),
        second.id()
    );
    assert_eq!(manager.registry().close_all(), 1);
}

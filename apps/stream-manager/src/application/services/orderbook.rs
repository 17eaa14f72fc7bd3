//! Orderbook Manager
//!
//! Level-2 streams mirrored into a local [`OrderBook`] per
//! (exchange, symbol). Each decoded update is applied, the resulting
//! snapshot is stored as the most recent book, and then the snapshot is
//! dispatched to every callback.
//!
//! A book outlives its stream: after a close or a connection loss the last
//! state stays readable until the key is created again.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::application::error::StreamError;
use crate::application::services::registry::{StreamRegistry, StreamTarget, dispatch};
use crate::domain::orderbook::{BookSnapshot, OrderBook};
use crate::domain::streaming::{StreamKey, StreamKind, StreamMessage};
use crate::domain::subscription::{BoundArgs, CallbackId};
use crate::domain::symbol::Exchange;
use crate::infrastructure::config::StreamSettings;
use crate::infrastructure::connection::{MessageHandler, StreamConnection};
use crate::infrastructure::events::EventHub;
use crate::infrastructure::exchanges::FeedRegistry;

/// Options for [`OrderbookManager::create_orderbook`].
#[derive(Debug, Clone, Default)]
pub struct OrderbookOptions {
    /// Exchange and symbol; omitted parts use the configured defaults.
    pub target: StreamTarget,
    /// Register the stream without starting it.
    pub initially_stopped: bool,
    /// Arguments passed to the callback on every invocation.
    pub args: BoundArgs,
}

/// Working book plus the last published snapshot.
#[derive(Debug, Default)]
struct MirroredBook {
    book: OrderBook,
    latest: BookSnapshot,
}

impl MirroredBook {
    /// Apply one message and publish the new snapshot. Trades are ignored.
    fn apply(&mut self, message: &StreamMessage) -> Option<BookSnapshot> {
        match message {
            StreamMessage::BookDeltas(deltas) => self.book.apply_deltas(deltas),
            StreamMessage::BookReplace(replace) => self.book.replace(replace),
            StreamMessage::Trade(_) => return None,
        }
        self.latest = Arc::new(self.book.clone());
        Some(Arc::clone(&self.latest))
    }
}

type SharedBook = Arc<Mutex<MirroredBook>>;

/// Manages order book streams and their mirrored books.
#[derive(Debug)]
pub struct OrderbookManager {
    registry: StreamRegistry<BookSnapshot>,
    books: RwLock<HashMap<(Exchange, String), SharedBook>>,
}

impl OrderbookManager {
    /// Create a manager with the built-in exchange feeds.
    #[must_use]
    pub fn new(settings: StreamSettings) -> Self {
        Self::with_feeds(settings, FeedRegistry::with_defaults())
    }

    /// Create a manager with a custom feed registry.
    #[must_use]
    pub fn with_feeds(settings: StreamSettings, feeds: FeedRegistry) -> Self {
        Self {
            registry: StreamRegistry::new(StreamKind::Orderbook, Arc::new(settings), feeds),
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Open an order book stream with `callback` as its first callback.
    ///
    /// The mirrored book is reset to empty before the stream starts.
    /// Returns `Ok(None)` if the exchange is not supported.
    ///
    /// # Errors
    ///
    /// `UnsupportedSymbolFormat` for a symbol the exchange cannot express,
    /// `NoRuntime` if the stream should start outside a Tokio runtime.
    pub fn create_orderbook<F>(
        &self,
        callback: F,
        options: OrderbookOptions,
    ) -> Result<Option<StreamConnection>, StreamError>
    where
        F: Fn(&BookSnapshot, &BoundArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let OrderbookOptions {
            target,
            initially_stopped,
            args,
        } = options;

        self.registry.open(
            &target,
            Arc::new(callback),
            args,
            initially_stopped,
            |key, callbacks| {
                let book = self.install_empty_book(key);
                let key = key.clone();
                let handler: MessageHandler = Arc::new(move |message: &StreamMessage| {
                    let Some(snapshot) = book.lock().apply(message) else {
                        return;
                    };
                    dispatch(&callbacks, &key, &snapshot);
                });
                Ok(handler)
            },
        )
    }

    /// Append a callback to an existing order book stream.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the stream was never created or has been closed.
    pub fn append_orderbook_callback<F>(
        &self,
        callback: F,
        target: &StreamTarget,
        args: BoundArgs,
    ) -> Result<CallbackId, StreamError>
    where
        F: Fn(&BookSnapshot, &BoundArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.append_callback(target, Arc::new(callback), args)
    }

    /// Remove a callback. Returns `false` if it was not registered.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the stream does not exist.
    pub fn remove_orderbook_callback(
        &self,
        target: &StreamTarget,
        id: CallbackId,
    ) -> Result<bool, StreamError> {
        self.registry.remove_callback(target, id)
    }

    /// Most recent mirrored book for a stream.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if no stream was ever created for the target.
    pub fn get_most_recent_orderbook(
        &self,
        target: &StreamTarget,
    ) -> Result<BookSnapshot, StreamError> {
        let key = self.registry.key(target)?;
        let book = self
            .books
            .read()
            .get(&(key.exchange, key.symbol.clone()))
            .cloned()
            .ok_or_else(|| StreamError::unknown(&key))?;
        let latest = Arc::clone(&book.lock().latest);
        Ok(latest)
    }

    /// Stop an order book stream and drop its callbacks. The last book
    /// stays available.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the stream does not exist.
    pub fn close_websocket(&self, target: &StreamTarget) -> Result<(), StreamError> {
        self.registry.close_websocket(target)
    }

    /// Connection events for every order book stream.
    #[must_use]
    pub const fn events(&self) -> &EventHub {
        self.registry.events()
    }

    /// Underlying registry.
    #[must_use]
    pub const fn registry(&self) -> &StreamRegistry<BookSnapshot> {
        &self.registry
    }

    fn install_empty_book(&self, key: &StreamKey) -> SharedBook {
        let book = SharedBook::default();
        self.books
            .write()
            .insert((key.exchange, key.symbol.clone()), Arc::clone(&book));
        book
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::streaming::{BookDelta, BookReplace, PriceLevel, Side, TradeTick};
    use crate::infrastructure::connection::ConnectionState;

    fn delta(side: Side, price: rust_decimal::Decimal, size: rust_decimal::Decimal) -> BookDelta {
        BookDelta {
            symbol: "BTC-USD".to_string(),
            side,
            price,
            size,
        }
    }

    fn stopped(target: StreamTarget) -> OrderbookOptions {
        OrderbookOptions {
            target,
            initially_stopped: true,
            args: BoundArgs::new(),
        }
    }

    fn collector(
        seen: &Arc<Mutex<Vec<BookSnapshot>>>,
    ) -> impl Fn(&BookSnapshot, &BoundArgs) -> anyhow::Result<()> + Send + Sync + 'static {
        let seen = Arc::clone(seen);
        move |book: &BookSnapshot, _: &BoundArgs| -> anyhow::Result<()> {
            seen.lock().push(Arc::clone(book));
            Ok(())
        }
    }

    #[test]
    fn book_is_empty_before_first_update() {
        let manager = OrderbookManager::new(StreamSettings::default());
        let target = StreamTarget::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let connection = manager
            .create_orderbook(collector(&seen), stopped(target.clone()))
            .unwrap()
            .unwrap();

        assert_eq!(connection.state(), ConnectionState::Created);
        assert!(manager.get_most_recent_orderbook(&target).unwrap().is_empty());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn deltas_build_sorted_book_and_publish_snapshots() {
        let manager = OrderbookManager::new(StreamSettings::default());
        let target = StreamTarget::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let connection = manager
            .create_orderbook(collector(&seen), stopped(target.clone()))
            .unwrap()
            .unwrap();

        connection.deliver(&StreamMessage::BookDeltas(vec![
            delta(Side::Bid, dec!(101), dec!(1)),
            delta(Side::Bid, dec!(100), dec!(2)),
            delta(Side::Ask, dec!(103), dec!(1)),
        ]));
        connection.deliver(&StreamMessage::BookDeltas(vec![delta(
            Side::Bid,
            dec!(101),
            dec!(0),
        )]));

        let book = manager.get_most_recent_orderbook(&target).unwrap();
        assert_eq!(book.bids, vec![PriceLevel::new(dec!(100), dec!(2))]);
        assert_eq!(book.asks, vec![PriceLevel::new(dec!(103), dec!(1))]);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        // Earlier snapshots are not touched by later updates.
        assert_eq!(seen[0].bids.len(), 2);
        assert!(Arc::ptr_eq(&seen[1], &book));
    }

    #[test]
    fn replace_and_trades() {
        let manager = OrderbookManager::new(StreamSettings::default());
        let target = StreamTarget::new("alpaca", "AAPL");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let connection = manager
            .create_orderbook(collector(&seen), stopped(target.clone()))
            .unwrap()
            .unwrap();

        connection.deliver(&StreamMessage::BookDeltas(vec![
            delta(Side::Bid, dec!(125), dec!(10)),
            delta(Side::Ask, dec!(130), dec!(4)),
        ]));
        connection.deliver(&StreamMessage::BookReplace(BookReplace {
            symbol: "AAPL-USD".to_string(),
            bids: vec![PriceLevel::new(dec!(126.5), dec!(3))],
            asks: vec![PriceLevel::new(dec!(126.75), dec!(2))],
        }));
        connection.deliver(&StreamMessage::Trade(TradeTick {
            exchange: Exchange::Alpaca,
            symbol: "AAPL-USD".to_string(),
            price: dec!(126.6),
            size: dec!(5),
            trade_id: "1".to_string(),
            time: chrono::Utc::now(),
            side: None,
        }));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].bids, vec![PriceLevel::new(dec!(125), dec!(10))]);
        // The replace discards the levels built by the earlier deltas.
        assert_eq!(seen[1].bids, vec![PriceLevel::new(dec!(126.5), dec!(3))]);
        assert_eq!(seen[1].asks, vec![PriceLevel::new(dec!(126.75), dec!(2))]);

        let book = manager.get_most_recent_orderbook(&target).unwrap();
        assert!(Arc::ptr_eq(&book, &seen[1]));
        assert_eq!(book.spread(), Some(dec!(0.25)));
    }

    #[test]
    fn unknown_book_is_an_error() {
        let manager = OrderbookManager::new(StreamSettings::default());
        let err = manager
            .get_most_recent_orderbook(&StreamTarget::default())
            .unwrap_err();
        assert!(err.is_unknown_stream());
    }

    #[test]
    fn book_survives_close_and_resets_on_recreate() {
        let manager = OrderbookManager::new(StreamSettings::default());
        let target = StreamTarget::default();
        let noop = |_: &BookSnapshot, _: &BoundArgs| -> anyhow::Result<()> { Ok(()) };

        let connection = manager
            .create_orderbook(noop, stopped(target.clone()))
            .unwrap()
            .unwrap();
        connection.deliver(&StreamMessage::BookDeltas(vec![delta(
            Side::Ask,
            dec!(10),
            dec!(1),
        )]));

        manager.close_websocket(&target).unwrap();

        assert_eq!(manager.get_most_recent_orderbook(&target).unwrap().asks.len(), 1);
        assert!(
            manager
                .append_orderbook_callback(noop, &target, BoundArgs::new())
                .unwrap_err()
                .is_unknown_stream()
        );

        manager.create_orderbook(noop, stopped(target.clone())).unwrap();
        assert!(manager.get_most_recent_orderbook(&target).unwrap().is_empty());
    }

    #[test]
    fn callback_may_append_callbacks() {
        let manager = Arc::new(OrderbookManager::new(StreamSettings::default()));
        let target = StreamTarget::default();

        let inner = Arc::clone(&manager);
        let inner_target = target.clone();
        let connection = manager
            .create_orderbook(
                move |_: &BookSnapshot, _: &BoundArgs| -> anyhow::Result<()> {
                    inner.append_orderbook_callback(
                        |_: &BookSnapshot, _: &BoundArgs| -> anyhow::Result<()> { Ok(()) },
                        &inner_target,
                        BoundArgs::new(),
                    )?;
                    Ok(())
                },
                stopped(target.clone()),
            )
            .unwrap()
            .unwrap();

        connection.deliver(&StreamMessage::BookDeltas(vec![delta(
            Side::Bid,
            dec!(1),
            dec!(1),
        )]));

        assert_eq!(manager.registry().callback_count(&target).unwrap(), 2);
    }
}

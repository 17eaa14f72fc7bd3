//! Exchange Adapters
//!
//! One [`ExchangeFeed`] implementation per supported venue, plus the
//! registry the stream managers use to look them up.

pub mod alpaca;
pub mod binance;
pub mod coinbase_pro;

use std::collections::HashMap;
use std::sync::Arc;

pub use alpaca::AlpacaFeed;
pub use binance::BinanceFeed;
pub use coinbase_pro::CoinbaseProFeed;

use crate::application::ports::ExchangeFeed;
use crate::domain::symbol::Exchange;

/// Venue adapters keyed by exchange.
#[derive(Debug, Clone)]
pub struct FeedRegistry {
    feeds: HashMap<Exchange, Arc<dyn ExchangeFeed>>,
}

impl FeedRegistry {
    /// Registry with the built-in adapter for every exchange.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for exchange in Exchange::all() {
            let feed: Arc<dyn ExchangeFeed> = match exchange {
                Exchange::Alpaca => Arc::new(AlpacaFeed),
                Exchange::CoinbasePro => Arc::new(CoinbaseProFeed),
                Exchange::Binance => Arc::new(BinanceFeed),
            };
            registry.register(feed);
        }
        registry
    }

    /// Registry with no adapters.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            feeds: HashMap::new(),
        }
    }

    /// Add or replace the adapter for `feed.exchange()`.
    pub fn register(&mut self, feed: Arc<dyn ExchangeFeed>) {
        self.feeds.insert(feed.exchange(), feed);
    }

    /// Adapter for an exchange, if registered.
    #[must_use]
    pub fn get(&self, exchange: Exchange) -> Option<Arc<dyn ExchangeFeed>> {
        self.feeds.get(&exchange).cloned()
    }

    /// Number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    /// Whether no adapters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

impl Default for FeedRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

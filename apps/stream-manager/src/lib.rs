#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Stream Manager - Real-Time Market Data Streams
//!
//! Opens one WebSocket stream per (exchange, symbol, kind), mirrors level-2
//! order books locally and fans normalized trades and book snapshots out to
//! registered callbacks.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `symbol`: Exchanges and canonical/native symbol translation
//!   - `streaming`: Normalized trades, book updates and stream keys
//!   - `orderbook`: Mirrored price-level book
//!   - `subscription`: Ordered callback lists with bound arguments
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `ExchangeFeed`, the per-venue wire adapter interface
//!   - `services`: Stream registry, ticker and order book managers
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchanges`: Alpaca, Coinbase Pro and Binance feeds
//!   - `connection`: WebSocket receive task and reconnection policy
//!   - `config`: Settings from the environment or a preferences file
//!   - `events`: Connection lifecycle broadcast
//!   - `tick_log`: JSON lines trade log
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//! Exchange WS ──► StreamConnection ──► ExchangeFeed::decode
//!                                          │
//!                  ┌───────────────────────┴────────────────┐
//!                  ▼                                        ▼
//!           TickerManager                          OrderbookManager
//!     (log sink, callbacks)               (apply → snapshot → callbacks)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stream_manager::{
//!     BookSnapshot, BoundArgs, OrderbookManager, OrderbookOptions, StreamSettings, StreamTarget,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = OrderbookManager::new(StreamSettings::from_env()?);
//! manager.create_orderbook(
//!     |book: &BookSnapshot, _: &BoundArgs| -> anyhow::Result<()> {
//!         println!("best bid: {:?}", book.best_bid());
//!         Ok(())
//!     },
//!     OrderbookOptions {
//!         target: StreamTarget::new("coinbase_pro", "BTC-USD"),
//!         ..OrderbookOptions::default()
//!     },
//! )?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Managers
pub use application::error::StreamError;
pub use application::ports::{ExchangeFeed, FeedContext, FeedError};
pub use application::services::{
    OrderbookManager, OrderbookOptions, StreamRegistry, StreamTarget, TickerManager,
    TickerOptions,
};

// Domain types
pub use domain::orderbook::{BookSnapshot, OrderBook};
pub use domain::streaming::{
    BookDelta, BookReplace, PriceLevel, Side, StreamKey, StreamKind, StreamMessage, TradeSide,
    TradeTick,
};
pub use domain::subscription::{BoundArgs, CallbackId};
pub use domain::symbol::{Exchange, SymbolError, to_canonical_symbol, to_exchange_symbol};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credentials, ExchangeSettings, StreamSettings, WebSocketSettings,
};

// Connections and events
pub use infrastructure::connection::{ConnectionState, StreamConnection};
pub use infrastructure::events::{ConnectionEvent, EventHub};
pub use infrastructure::exchanges::FeedRegistry;

// Telemetry
pub use infrastructure::metrics::describe_metrics;
pub use infrastructure::telemetry::init as init_telemetry;

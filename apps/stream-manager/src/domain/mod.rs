//! Domain Layer - Core market data types and business logic.
//!
//! This layer contains the pure domain types for market data streaming.
//! Nothing here performs I/O.

/// Canonical and exchange-native symbol translation.
pub mod symbol;

/// Market data streaming types (trades, book updates, stream keys).
pub mod streaming;

/// Locally mirrored order book.
pub mod orderbook;

/// Callback registration and dispatch.
pub mod subscription;

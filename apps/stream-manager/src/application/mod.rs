//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the stream managers and the port interfaces
//! that define how they interact with exchange feeds.

/// Errors surfaced by the stream managers.
pub mod error;

/// Port interfaces for exchange feeds.
pub mod ports;

/// Ticker and order book stream managers.
pub mod services;

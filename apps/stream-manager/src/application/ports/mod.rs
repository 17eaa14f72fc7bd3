//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ExchangeFeed`: venue wire protocol (endpoint, handshake, decoding)

mod exchange_feed_port;

pub use exchange_feed_port::{ExchangeFeed, FeedContext, FeedError};

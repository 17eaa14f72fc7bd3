//! Configuration Module
//!
//! Configuration loading for the stream managers.

mod settings;

pub use settings::{ConfigError, Credentials, ExchangeSettings, StreamSettings, WebSocketSettings};

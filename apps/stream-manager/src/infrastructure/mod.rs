//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading from the environment and preference files.
pub mod config;

/// WebSocket stream connections and reconnection policy.
pub mod connection;

/// Connection lifecycle event broadcasting.
pub mod events;

/// Per-venue feed adapters.
pub mod exchanges;

/// Metrics instrumentation.
pub mod metrics;

/// Tracing subscriber setup.
pub mod telemetry;

/// Ticker log file sink.
pub mod tick_log;

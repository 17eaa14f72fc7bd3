//! Stream Metrics
//!
//! Counters and gauges recorded through the `metrics` facade.
//!
//! # Metrics Categories
//!
//! - **Messages**: frames received and messages decoded per exchange
//! - **Errors**: decode failures, callback failures, connection losses
//! - **Connections**: active streams and reconnect attempts
//!
//! # Integration
//!
//! Nothing is exported unless the embedding application installs a
//! recorder. Without one every call here is a no-op.

use std::sync::Once;

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::domain::streaming::StreamKind;
use crate::domain::symbol::Exchange;

static DESCRIBE: Once = Once::new();

// =============================================================================
// Metric Registration
// =============================================================================

/// Describe every metric to the installed recorder.
///
/// Call after installing a recorder; repeated calls are ignored.
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            "stream_manager_messages_received_total",
            "Normalized messages delivered by stream connections"
        );
        describe_counter!(
            "stream_manager_decode_errors_total",
            "Inbound frames that failed to decode"
        );
        describe_counter!(
            "stream_manager_callback_failures_total",
            "Callbacks that returned an error or panicked"
        );
        describe_counter!(
            "stream_manager_connection_lost_total",
            "Streams stopped by a network loss"
        );
        describe_counter!(
            "stream_manager_reconnects_total",
            "WebSocket reconnection attempts"
        );
        describe_gauge!(
            "stream_manager_active_streams",
            "Number of running stream connections"
        );
    });
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a decoded message.
pub fn record_message_received(exchange: Exchange, kind: StreamKind) {
    counter!(
        "stream_manager_messages_received_total",
        "exchange" => exchange.as_str(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error(exchange: Exchange) {
    counter!(
        "stream_manager_decode_errors_total",
        "exchange" => exchange.as_str()
    )
    .increment(1);
}

/// Record failed callback invocations.
pub fn record_callback_failures(kind: StreamKind, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "stream_manager_callback_failures_total",
        "kind" => kind.as_str()
    )
    .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Record a stream stopped by a network loss.
pub fn record_connection_lost(exchange: Exchange) {
    counter!(
        "stream_manager_connection_lost_total",
        "exchange" => exchange.as_str()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(exchange: Exchange) {
    counter!(
        "stream_manager_reconnects_total",
        "exchange" => exchange.as_str()
    )
    .increment(1);
}

/// Adjust the running stream gauge.
pub fn stream_started(exchange: Exchange) {
    gauge!("stream_manager_active_streams", "exchange" => exchange.as_str()).increment(1.0);
}

/// Adjust the running stream gauge.
pub fn stream_stopped(exchange: Exchange) {
    gauge!("stream_manager_active_streams", "exchange" => exchange.as_str()).decrement(1.0);
}

// =============================================================================
// Tests
// =============================================================================

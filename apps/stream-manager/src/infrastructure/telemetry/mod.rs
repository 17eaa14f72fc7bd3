//! Tracing Initialization
//!
//! Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG`.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard filter directives (default: `stream_manager=info`)
//!
//! # Usage
//!
//! ```ignore
//! use stream_manager::infrastructure::telemetry;
//!
//! telemetry::init();
//! tracing::info!("Streams starting");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter applied when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "stream_manager=info,tungstenite=warn,tokio_tungstenite=warn";

/// Install the global subscriber.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one is left in place.
pub fn init() -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        let _ = init();
        assert!(!init());
    }
}

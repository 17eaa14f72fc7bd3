//! Stream Manager Configuration Settings
//!
//! Configuration types for the stream managers, loaded from defaults,
//! environment variables or a preferences JSON file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::symbol::Exchange;

/// Exchange API credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Per-venue endpoint and channel settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSettings {
    /// Live WebSocket base URL. May contain a `{stream}` placeholder.
    pub live_url: String,
    /// Sandbox WebSocket base URL. May contain a `{stream}` placeholder.
    pub sandbox_url: String,
    /// Named data stream substituted into the URL (Alpaca `iex`/`sip`).
    pub websocket_stream: Option<String>,
    /// Channel used for ticker streams.
    pub ticker_channel: String,
    /// Channel used for order book streams.
    pub orderbook_channel: String,
    /// Optional API credentials for authenticated feeds.
    pub credentials: Option<Credentials>,
}

impl ExchangeSettings {
    /// Default settings for a venue.
    #[must_use]
    pub fn for_exchange(exchange: Exchange) -> Self {
        match exchange {
            Exchange::Alpaca => Self {
                live_url: "wss://stream.data.alpaca.markets/v2/{stream}".to_string(),
                sandbox_url: "wss://paper-api.alpaca.markets/stream/v2/{stream}".to_string(),
                websocket_stream: Some("iex".to_string()),
                ticker_channel: "trades".to_string(),
                orderbook_channel: "quotes".to_string(),
                credentials: None,
            },
            Exchange::CoinbasePro => Self {
                live_url: "wss://ws-feed.pro.coinbase.com".to_string(),
                sandbox_url: "wss://ws-feed-public.sandbox.pro.coinbase.com".to_string(),
                websocket_stream: None,
                ticker_channel: "matches".to_string(),
                orderbook_channel: "level2".to_string(),
                credentials: None,
            },
            Exchange::Binance => Self {
                live_url: "wss://stream.binance.com:9443/ws".to_string(),
                sandbox_url: "wss://testnet.binance.vision/ws".to_string(),
                websocket_stream: None,
                ticker_channel: "trade".to_string(),
                orderbook_channel: "depth@100ms".to_string(),
                credentials: None,
            },
        }
    }

    /// Resolve the base URL for the live or sandbox environment.
    #[must_use]
    pub fn base_url(&self, sandbox: bool) -> String {
        let template = if sandbox {
            &self.sandbox_url
        } else {
            &self.live_url
        };
        let stream = self.websocket_stream.as_deref().unwrap_or_default();
        template.replace("{stream}", stream)
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Interval between client pings.
    pub ping_interval: Duration,
    /// Silence on the socket longer than this is treated as a dead connection.
    pub heartbeat_timeout: Duration,
    /// Reconnect with backoff after a network loss instead of stopping.
    pub auto_reconnect: bool,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            auto_reconnect: false,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Complete stream manager configuration.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Connect to sandbox endpoints instead of live ones.
    pub use_sandbox_websockets: bool,
    /// Exchange used when a call does not name one.
    pub default_exchange: String,
    /// Canonical symbol used when a call does not name one.
    pub default_symbol: String,
    /// Alpaca settings.
    pub alpaca: ExchangeSettings,
    /// Coinbase Pro settings.
    pub coinbase_pro: ExchangeSettings,
    /// Binance settings.
    pub binance: ExchangeSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Capacity of the connection event broadcast channel.
    pub event_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            use_sandbox_websockets: false,
            default_exchange: Exchange::CoinbasePro.as_str().to_string(),
            default_symbol: "BTC-USD".to_string(),
            alpaca: ExchangeSettings::for_exchange(Exchange::Alpaca),
            coinbase_pro: ExchangeSettings::for_exchange(Exchange::CoinbasePro),
            binance: ExchangeSettings::for_exchange(Exchange::Binance),
            websocket: WebSocketSettings::default(),
            event_capacity: 1_024,
        }
    }
}

impl StreamSettings {
    /// Settings for one venue.
    #[must_use]
    pub const fn exchange(&self, exchange: Exchange) -> &ExchangeSettings {
        match exchange {
            Exchange::Alpaca => &self.alpaca,
            Exchange::CoinbasePro => &self.coinbase_pro,
            Exchange::Binance => &self.binance,
        }
    }

    /// Mutable settings for one venue.
    pub const fn exchange_mut(&mut self, exchange: Exchange) -> &mut ExchangeSettings {
        match exchange {
            Exchange::Alpaca => &mut self.alpaca,
            Exchange::CoinbasePro => &mut self.coinbase_pro,
            Exchange::Binance => &mut self.binance,
        }
    }

    /// Load a `.env` file from the current directory or any ancestor.
    pub fn load_dotenv() {
        if dotenvy::dotenv().is_ok() {
            return;
        }

        if let Ok(cwd) = std::env::current_dir() {
            let mut dir = cwd.as_path();
            while let Some(parent) = dir.parent() {
                let env_path = parent.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                    return;
                }
                dir = parent;
            }
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Unset or malformed values fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a default exchange or symbol is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a default exchange or symbol is set but empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = EnvSource(&lookup);

        let default_exchange = env.non_empty("STREAM_DEFAULT_EXCHANGE")?;
        let default_symbol = env.non_empty("STREAM_DEFAULT_SYMBOL")?;

        let websocket = WebSocketSettings {
            ping_interval: env.duration_secs(
                "STREAM_PING_INTERVAL_SECS",
                defaults.websocket.ping_interval,
            ),
            heartbeat_timeout: env.duration_secs(
                "STREAM_HEARTBEAT_TIMEOUT_SECS",
                defaults.websocket.heartbeat_timeout,
            ),
            auto_reconnect: env.bool("STREAM_AUTO_RECONNECT", defaults.websocket.auto_reconnect),
            reconnect_delay_initial: env.duration_millis(
                "STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.websocket.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.websocket.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.websocket.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.websocket.max_reconnect_attempts,
            ),
        };

        let mut settings = Self {
            use_sandbox_websockets: env.bool(
                "STREAM_USE_SANDBOX_WEBSOCKETS",
                defaults.use_sandbox_websockets,
            ),
            default_exchange: default_exchange.unwrap_or(defaults.default_exchange),
            default_symbol: default_symbol.unwrap_or(defaults.default_symbol),
            websocket,
            event_capacity: env.parse("STREAM_EVENT_CAPACITY", defaults.event_capacity),
            ..defaults
        };

        for exchange in Exchange::all() {
            let prefix = exchange.as_str().to_uppercase();
            let venue = settings.exchange_mut(*exchange);
            if let Some(url) = env.get(&format!("{prefix}_WS_URL")) {
                venue.live_url = url;
            }
            if let Some(url) = env.get(&format!("{prefix}_SANDBOX_WS_URL")) {
                venue.sandbox_url = url;
            }
        }

        if let Some(feed) = env.get("ALPACA_FEED") {
            settings.alpaca.websocket_stream = Some(feed.to_lowercase());
        }
        if let (Some(key), Some(secret)) = (env.get("ALPACA_KEY"), env.get("ALPACA_SECRET")) {
            settings.alpaca.credentials = Some(Credentials::new(key, secret));
        }

        Ok(settings)
    }

    /// Create configuration from a preferences document.
    ///
    /// The document has the shape
    /// `{"settings": {"use_sandbox_websockets": false, "alpaca": {"websocket_stream": "iex"}}}`.
    /// Missing keys keep their defaults and unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON.
    pub fn from_preferences_json(json: &str) -> Result<Self, ConfigError> {
        let prefs: PreferencesFile = serde_json::from_str(json)?;
        let prefs = prefs.settings;
        let mut settings = Self::default();

        if let Some(sandbox) = prefs.use_sandbox_websockets {
            settings.use_sandbox_websockets = sandbox;
        }
        if let Some(exchange) = prefs.default_exchange.filter(|s| !s.is_empty()) {
            settings.default_exchange = exchange;
        }
        if let Some(symbol) = prefs.default_symbol.filter(|s| !s.is_empty()) {
            settings.default_symbol = symbol;
        }

        for (exchange, venue) in [
            (Exchange::Alpaca, prefs.alpaca),
            (Exchange::CoinbasePro, prefs.coinbase_pro),
            (Exchange::Binance, prefs.binance),
        ] {
            if let Some(venue) = venue {
                venue.apply(settings.exchange_mut(exchange));
            }
        }

        Ok(settings)
    }

    /// Create configuration from a preferences file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_preferences_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_preferences_json(&json)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Preferences file could not be read.
    #[error("failed to read preferences: {0}")]
    Io(#[from] std::io::Error),
    /// Preferences file is not valid JSON.
    #[error("invalid preferences JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

// =============================================================================
// Preferences Document
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct PreferencesFile {
    #[serde(default)]
    settings: Preferences,
}

#[derive(Debug, Default, Deserialize)]
struct Preferences {
    use_sandbox_websockets: Option<bool>,
    default_exchange: Option<String>,
    default_symbol: Option<String>,
    alpaca: Option<VenuePreferences>,
    coinbase_pro: Option<VenuePreferences>,
    binance: Option<VenuePreferences>,
}

#[derive(Debug, Default, Deserialize)]
struct VenuePreferences {
    websocket_stream: Option<String>,
    live_url: Option<String>,
    sandbox_url: Option<String>,
}

impl VenuePreferences {
    fn apply(self, venue: &mut ExchangeSettings) {
        if let Some(stream) = self.websocket_stream {
            venue.websocket_stream = Some(stream);
        }
        if let Some(url) = self.live_url {
            venue.live_url = url;
        }
        if let Some(url) = self.sandbox_url {
            venue.sandbox_url = url;
        }
    }
}

// =============================================================================
// Environment Parsing
// =============================================================================

struct EnvSource<'a, F>(&'a F);

impl<F> EnvSource<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn non_empty(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match (self.0)(key) {
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            other => Ok(other.map(|v| v.trim().to_string())),
        }
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_lowercase()).as_deref() {
            Some("true" | "1") => true,
            Some("false" | "0") => false,
            _ => default,
        }
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let settings = StreamSettings::default();
        assert!(!settings.use_sandbox_websockets);
        assert_eq!(settings.default_exchange, "coinbase_pro");
        assert_eq!(settings.default_symbol, "BTC-USD");
        assert!(!settings.websocket.auto_reconnect);
        assert_eq!(settings.alpaca.websocket_stream.as_deref(), Some("iex"));
    }

    #[test]
    fn alpaca_url_fills_stream_placeholder() {
        let alpaca = ExchangeSettings::for_exchange(Exchange::Alpaca);
        assert_eq!(
            alpaca.base_url(false),
            "wss://stream.data.alpaca.markets/v2/iex"
        );
        assert_eq!(
            alpaca.base_url(true),
            "wss://paper-api.alpaca.markets/stream/v2/iex"
        );
    }

    #[test]
    fn coinbase_sandbox_url() {
        let settings = StreamSettings::default();
        assert_eq!(
            settings.exchange(Exchange::CoinbasePro).base_url(true),
            "wss://ws-feed-public.sandbox.pro.coinbase.com"
        );
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("key123".to_string(), "secret456".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn from_lookup_reads_values() {
        let settings = StreamSettings::from_lookup(lookup(&[
            ("STREAM_USE_SANDBOX_WEBSOCKETS", "1"),
            ("STREAM_DEFAULT_EXCHANGE", "binance"),
            ("STREAM_DEFAULT_SYMBOL", "ETH-USDT"),
            ("STREAM_AUTO_RECONNECT", "true"),
            ("STREAM_MAX_RECONNECT_ATTEMPTS", "5"),
            ("ALPACA_FEED", "SIP"),
            ("ALPACA_KEY", "k"),
            ("ALPACA_SECRET", "s"),
            ("BINANCE_WS_URL", "ws://127.0.0.1:9000/ws"),
        ]))
        .unwrap();

        assert!(settings.use_sandbox_websockets);
        assert_eq!(settings.default_exchange, "binance");
        assert_eq!(settings.default_symbol, "ETH-USDT");
        assert!(settings.websocket.auto_reconnect);
        assert_eq!(settings.websocket.max_reconnect_attempts, 5);
        assert_eq!(settings.alpaca.websocket_stream.as_deref(), Some("sip"));
        assert_eq!(settings.alpaca.credentials.as_ref().unwrap().api_key(), "k");
        assert_eq!(settings.binance.live_url, "ws://127.0.0.1:9000/ws");
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let settings = StreamSettings::from_lookup(lookup(&[
            ("STREAM_USE_SANDBOX_WEBSOCKETS", "maybe"),
            ("STREAM_PING_INTERVAL_SECS", "soon"),
            ("STREAM_RECONNECT_DELAY_MULTIPLIER", "fast"),
        ]))
        .unwrap();

        assert!(!settings.use_sandbox_websockets);
        assert_eq!(settings.websocket.ping_interval, Duration::from_secs(30));
        assert!((settings.websocket.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_credentials_are_ignored() {
        let settings = StreamSettings::from_lookup(lookup(&[("ALPACA_KEY", "k")])).unwrap();
        assert!(settings.alpaca.credentials.is_none());
    }

    #[test]
    fn empty_default_symbol_is_an_error() {
        let err = StreamSettings::from_lookup(lookup(&[("STREAM_DEFAULT_SYMBOL", " ")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(ref key) if key == "STREAM_DEFAULT_SYMBOL"));
    }

    #[test]
    fn preferences_json_overrides_defaults() {
        let settings = StreamSettings::from_preferences_json(
            r#"{
                "settings": {
                    "use_sandbox_websockets": true,
                    "alpaca": {"websocket_stream": "sip", "unused": 1},
                    "coinbase_pro": {"cash": "USD"}
                },
                "account": "ignored"
            }"#,
        )
        .unwrap();

        assert!(settings.use_sandbox_websockets);
        assert_eq!(settings.alpaca.websocket_stream.as_deref(), Some("sip"));
        assert_eq!(
            settings.alpaca.base_url(true),
            "wss://paper-api.alpaca.markets/stream/v2/sip"
        );
        assert_eq!(settings.default_exchange, "coinbase_pro");
    }

    #[test]
    fn preferences_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"settings": {{"default_symbol": "ETH-USD"}}}}"#).unwrap();

        let settings = StreamSettings::from_preferences_file(file.path()).unwrap();
        assert_eq!(settings.default_symbol, "ETH-USD");
    }

    #[test]
    fn preferences_errors() {
        assert!(matches!(
            StreamSettings::from_preferences_json("{not json"),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            StreamSettings::from_preferences_file("/nonexistent/settings.json"),
            Err(ConfigError::Io(_))
        ));
    }
}

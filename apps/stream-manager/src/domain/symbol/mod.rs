//! Symbol Translation
//!
//! Maps canonical `BASE-QUOTE` identifiers to and from the native
//! identifiers each venue uses on the wire.
//!
//! | Exchange       | Canonical  | Native    |
//! |----------------|------------|-----------|
//! | `coinbase_pro` | `BTC-USD`  | `BTC-USD` |
//! | `binance`      | `BTC-USDT` | `BTCUSDT` |
//! | `alpaca`       | `AAPL-USD` | `AAPL`    |
//!
//! For every symbol a venue supports the translation round-trips:
//! `to_canonical_symbol(to_exchange_symbol(s, e)?, e, quote(s))? == s`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Separator between base and quote asset in canonical symbols.
pub const SEPARATOR: char = '-';

// =============================================================================
// Exchange
// =============================================================================

/// Venues the stream manager knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exchange {
    /// Alpaca market data (US equities).
    Alpaca,
    /// Coinbase Pro websocket feed.
    CoinbasePro,
    /// Binance spot streams.
    Binance,
}

impl Exchange {
    /// Get all exchanges.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Alpaca, Self::CoinbasePro, Self::Binance]
    }

    /// Get the exchange wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Alpaca => "alpaca",
            Self::CoinbasePro => "coinbase_pro",
            Self::Binance => "binance",
        }
    }

    /// Quote asset assumed when the caller does not name one.
    #[must_use]
    pub const fn default_quote_asset(&self) -> &'static str {
        match self {
            Self::Alpaca | Self::CoinbasePro => "USD",
            Self::Binance => "USDT",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "alpaca" => Ok(Self::Alpaca),
            "coinbase_pro" | "coinbasepro" => Ok(Self::CoinbasePro),
            "binance" => Ok(Self::Binance),
            _ => Err(SymbolError::UnknownExchange(s.to_string())),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Symbol translation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// The symbol does not match the shape the venue expects.
    #[error("unsupported symbol format `{symbol}` for {exchange}: {reason}")]
    UnsupportedFormat {
        /// Offending symbol.
        symbol: String,
        /// Venue the translation was attempted for.
        exchange: Exchange,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The exchange name is not one of the known venues.
    #[error("unknown exchange `{0}`")]
    UnknownExchange(String),
}

impl SymbolError {
    const fn format(symbol: String, exchange: Exchange, reason: &'static str) -> Self {
        Self::UnsupportedFormat {
            symbol,
            exchange,
            reason,
        }
    }
}

// =============================================================================
// Translation
// =============================================================================

/// Split a canonical symbol into `(base, quote)`.
///
/// # Errors
///
/// Returns `UnsupportedFormat` if the separator is missing, repeated, or
/// either side is empty or contains characters other than ASCII
/// alphanumerics and `.`.
pub fn split_canonical(canonical: &str, exchange: Exchange) -> Result<(&str, &str), SymbolError> {
    let Some((base, quote)) = canonical.split_once(SEPARATOR) else {
        return Err(SymbolError::format(
            canonical.to_string(),
            exchange,
            "missing BASE-QUOTE separator",
        ));
    };

    if !is_asset(base) || !is_asset(quote) {
        return Err(SymbolError::format(
            canonical.to_string(),
            exchange,
            "base and quote must be non-empty alphanumeric assets",
        ));
    }

    Ok((base, quote))
}

/// Quote asset of a canonical symbol.
///
/// # Errors
///
/// Returns `UnsupportedFormat` if the symbol is not canonical.
pub fn quote_asset(canonical: &str, exchange: Exchange) -> Result<&str, SymbolError> {
    split_canonical(canonical, exchange).map(|(_, quote)| quote)
}

/// Translate a canonical symbol into the venue's native identifier.
///
/// # Errors
///
/// Returns `UnsupportedFormat` if the symbol is not canonical or the venue
/// cannot express it.
pub fn to_exchange_symbol(canonical: &str, exchange: Exchange) -> Result<String, SymbolError> {
    let (base, quote) = split_canonical(canonical, exchange)?;

    match exchange {
        Exchange::CoinbasePro => Ok(format!("{base}{SEPARATOR}{quote}")),
        Exchange::Binance => Ok(format!("{base}{quote}")),
        Exchange::Alpaca => {
            if quote != exchange.default_quote_asset() {
                return Err(SymbolError::format(
                    canonical.to_string(),
                    exchange,
                    "alpaca symbols are quoted in USD",
                ));
            }
            Ok(base.to_string())
        }
    }
}

/// Translate a venue-native identifier back to canonical form.
///
/// # Errors
///
/// Returns `UnsupportedFormat` if the native symbol does not match the
/// venue's shape or does not trade against `quote_asset`.
pub fn to_canonical_symbol(
    exchange_symbol: &str,
    exchange: Exchange,
    quote_asset: &str,
) -> Result<String, SymbolError> {
    if !is_asset(quote_asset) {
        return Err(SymbolError::format(
            quote_asset.to_string(),
            exchange,
            "quote asset must be alphanumeric",
        ));
    }

    match exchange {
        Exchange::CoinbasePro => {
            let (_, quote) = split_canonical(exchange_symbol, exchange)?;
            if quote != quote_asset {
                return Err(SymbolError::format(
                    exchange_symbol.to_string(),
                    exchange,
                    "quote asset does not match product",
                ));
            }
            Ok(exchange_symbol.to_string())
        }
        Exchange::Binance => {
            let base = exchange_symbol
                .strip_suffix(quote_asset)
                .filter(|base| is_asset(base))
                .ok_or_else(|| {
                    SymbolError::format(
                        exchange_symbol.to_string(),
                        exchange,
                        "pair does not end with the quote asset",
                    )
                })?;
            Ok(format!("{base}{SEPARATOR}{quote_asset}"))
        }
        Exchange::Alpaca => {
            if !is_asset(exchange_symbol) {
                return Err(SymbolError::format(
                    exchange_symbol.to_string(),
                    exchange,
                    "expected a bare ticker",
                ));
            }
            if quote_asset != exchange.default_quote_asset() {
                return Err(SymbolError::format(
                    exchange_symbol.to_string(),
                    exchange,
                    "alpaca symbols are quoted in USD",
                ));
            }
            Ok(format!("{exchange_symbol}{SEPARATOR}{quote_asset}"))
        }
    }
}

/// Normalize a caller-supplied symbol to canonical form.
///
/// Assets are uppercased, so `btc-usd` and `BTC-USD` name the same stream.
/// Alpaca additionally accepts a bare equity ticker (`AAPL`), which is
/// treated as quoted in USD.
///
/// # Errors
///
/// Returns `UnsupportedFormat` if the symbol cannot be expressed on the venue.
pub fn canonicalize(symbol: &str, exchange: Exchange) -> Result<String, SymbolError> {
    let symbol = symbol.trim().to_ascii_uppercase();

    if exchange == Exchange::Alpaca && !symbol.contains(SEPARATOR) {
        return to_canonical_symbol(&symbol, exchange, exchange.default_quote_asset());
    }

    let native = to_exchange_symbol(&symbol, exchange)?;
    let quote = quote_asset(&symbol, exchange)?;
    to_canonical_symbol(&native, exchange, quote)
}

fn is_asset(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
}

// =============================================================================
// Tests
// =============================================================================

//! Mirrored Order Book
//!
//! A locally mirrored price-level book. Both sides are kept strictly
//! ascending by price with one entry per price and no zero-size levels,
//! so the best bid is the last bid and the best ask is the first ask.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::streaming::{BookDelta, BookReplace, PriceLevel, Side};

/// Point-in-time snapshot handed to callbacks.
pub type BookSnapshot = Arc<OrderBook>;

/// Price-level order book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Bid levels, ascending by price.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, ascending by price.
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Create an empty book.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Whether both sides are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Levels on one side.
    #[must_use]
    pub fn side(&self, side: Side) -> &[PriceLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    const fn side_mut(&mut self, side: Side) -> &mut Vec<PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Apply a single price-level change.
    ///
    /// Finds the first level whose price is not below the delta price. A
    /// non-positive size removes that level when the prices match and is
    /// otherwise a no-op; a positive size overwrites a matching level or is
    /// inserted in order.
    pub fn apply_delta(&mut self, delta: &BookDelta) {
        let levels = self.side_mut(delta.side);
        let idx = levels.partition_point(|level| level.price < delta.price);
        let exists = levels.get(idx).is_some_and(|level| level.price == delta.price);

        if delta.size <= Decimal::ZERO {
            if exists {
                levels.remove(idx);
            }
        } else if exists {
            levels[idx].size = delta.size;
        } else {
            levels.insert(idx, PriceLevel::new(delta.price, delta.size));
        }
    }

    /// Apply every change from one wire message, in order.
    pub fn apply_deltas<'a>(&mut self, deltas: impl IntoIterator<Item = &'a BookDelta>) {
        for delta in deltas {
            self.apply_delta(delta);
        }
    }

    /// Replace both sides with the supplied levels.
    ///
    /// Input may be unsorted and contain duplicates or zero sizes; the last
    /// occurrence of a price wins and non-positive sizes are dropped.
    pub fn replace(&mut self, replace: &BookReplace) {
        self.bids = normalize(&replace.bids);
        self.asks = normalize(&replace.asks);
    }

    /// Drop every level.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Highest bid.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.last()
    }

    /// Lowest ask.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Best ask minus best bid.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// Midpoint of the best bid and ask.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        Some((self.best_ask()?.price + self.best_bid()?.price) / Decimal::TWO)
    }
}

fn normalize(levels: &[PriceLevel]) -> Vec<PriceLevel> {
    let mut out: Vec<PriceLevel> = Vec::with_capacity(levels.len());
    for level in levels {
        let idx = out.partition_point(|l| l.price < level.price);
        if out.get(idx).is_some_and(|l| l.price == level.price) {
            out[idx].size = level.size;
        } else {
            out.insert(idx, *level);
        }
    }
    out.retain(|level| level.size > Decimal::ZERO);
    out
}

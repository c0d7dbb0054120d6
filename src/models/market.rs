//! Instrument constraints and trend classification.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange-imposed granularity for one trading symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSpec {
    /// Smallest order quantity accepted
    pub min_qty: Decimal,

    /// Quantity increment
    pub qty_step: Decimal,

    /// Price increment
    pub tick_size: Decimal,
}

impl SymbolSpec {
    /// Round a raw price to the nearest multiple of the tick size.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size.is_zero() {
            return price;
        }
        let steps = (price / self.tick_size).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        (steps * self.tick_size).normalize()
    }

    /// Floor a raw quantity to a multiple of the quantity step.
    pub fn floor_qty(&self, qty: Decimal) -> Decimal {
        if self.qty_step.is_zero() {
            return qty;
        }
        ((qty / self.qty_step).floor() * self.qty_step).normalize()
    }
}

/// Trend derived from comparing the fast and slow averages on one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Long,
    Short,
    Flat,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Long => write!(f, "long"),
            Trend::Short => write!(f, "short"),
            Trend::Flat => write!(f, "flat"),
        }
    }
}

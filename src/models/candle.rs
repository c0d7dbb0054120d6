//! Candle (kline) model and the indicator bar derived from it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One fixed-duration OHLCV summary of trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle start time (unique, ascending within a sequence)
    pub open_time: DateTime<Utc>,

    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,

    /// Traded volume in contracts
    pub volume: Decimal,

    /// Traded value in quote currency
    #[serde(default)]
    pub turnover: Decimal,
}

impl Candle {
    /// Create a flat candle where every price equals `close`.
    #[cfg(test)]
    pub fn flat(open_time: DateTime<Utc>, close: Decimal) -> Self {
        Self {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
            turnover: Decimal::ZERO,
        }
    }
}

/// A closed candle together with both moving averages at that candle.
///
/// Only built where both averages are defined, so warm-up entries can never
/// leak into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorBar {
    pub open_time: DateTime<Utc>,
    pub close: Decimal,
    pub ema_fast: Decimal,
    pub ema_slow: Decimal,
}

impl IndicatorBar {
    /// Whether the close sits strictly below the fast average.
    pub fn closed_below_fast(&self) -> bool {
        self.close < self.ema_fast
    }

    /// Whether the close sits strictly above the fast average.
    pub fn closed_above_fast(&self) -> bool {
        self.close > self.ema_fast
    }
}

//! EMA pullback rules.
//!
//! This module defines the rules for:
//! - Classifying the trend of a closed bar
//! - Detecting a pullback entry against the trend's fast average
//! - Take-profit and breakeven-on-reversal exits

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use super::StrategyConfig;
use crate::models::{Candle, IndicatorBar, PositionSide, Trend};

/// Trend of a single bar: fast above slow is long, below is short.
pub fn classify_trend(bar: &IndicatorBar) -> Trend {
    if bar.ema_fast > bar.ema_slow {
        Trend::Long
    } else if bar.ema_fast < bar.ema_slow {
        Trend::Short
    } else {
        Trend::Flat
    }
}

/// True once per distinct open time of the last candle.
///
/// Records the last candle's open time in `last_seen` whenever it is newer.
pub fn detect_new_close(candles: &[Candle], last_seen: &mut Option<DateTime<Utc>>) -> bool {
    let Some(latest) = candles.last().map(|c| c.open_time) else {
        return false;
    };

    match *last_seen {
        Some(seen) if latest <= seen => false,
        _ => {
            *last_seen = Some(latest);
            true
        }
    }
}

/// Reason for exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    TakeProfit,
    Breakeven,
    None,
}

/// Exit levels for the current position and whether one was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSignal {
    pub reason: ExitReason,

    /// Take-profit price derived from the average entry
    pub take_profit: Decimal,

    /// Breakeven exit price, present only once the trend has turned against the position
    pub breakeven: Option<Decimal>,
}

#[cfg(test)]
impl ExitSignal {
    pub fn should_exit(&self) -> bool {
        self.reason != ExitReason::None
    }
}

/// Entry and exit rules over a strategy configuration.
#[derive(Debug, Clone)]
pub struct Strategy {
    config: StrategyConfig,
}

impl Strategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    // ==================== Entry ====================

    /// Side to open, if the closed bar pulled back through the fast average
    /// while the previous bar was still on the trend side of it.
    pub fn entry_signal(&self, previous: &IndicatorBar, closed: &IndicatorBar) -> Option<PositionSide> {
        match classify_trend(closed) {
            Trend::Long if closed.closed_below_fast() && previous.closed_above_fast() => {
                Some(PositionSide::Long)
            }
            Trend::Short
                if !self.config.long_only
                    && closed.closed_above_fast()
                    && previous.closed_below_fast() =>
            {
                Some(PositionSide::Short)
            }
            _ => None,
        }
    }

    // ==================== Exit ====================

    pub fn take_profit_target(&self, side: PositionSide, avg_price: Decimal) -> Decimal {
        match side {
            PositionSide::Long => avg_price * (Decimal::ONE + self.config.take_profit_rate),
            PositionSide::Short => avg_price * (Decimal::ONE - self.config.take_profit_rate),
        }
    }

    /// Exit price covering the round-trip commission.
    pub fn breakeven_price(&self, side: PositionSide, avg_price: Decimal) -> Decimal {
        let fee = avg_price * self.config.commission_rate;
        match side {
            PositionSide::Long => avg_price + fee,
            PositionSide::Short => avg_price - fee,
        }
    }

    /// Evaluate take-profit first, then breakeven when `last_trend` opposes `side`.
    pub fn check_exit(
        &self,
        side: PositionSide,
        avg_price: Decimal,
        price: Decimal,
        last_trend: Option<Trend>,
    ) -> ExitSignal {
        let take_profit = self.take_profit_target(side, avg_price);
        let reversed = matches!(
            (side, last_trend),
            (PositionSide::Long, Some(Trend::Short)) | (PositionSide::Short, Some(Trend::Long))
        );
        let breakeven = reversed.then(|| self.breakeven_price(side, avg_price));

        let reason = if reached(side, price, take_profit) {
            debug!(side = %side, price = %price, target = %take_profit, "Take profit triggered");
            ExitReason::TakeProfit
        } else if breakeven.is_some_and(|exit| reached(side, price, exit)) {
            debug!(side = %side, price = %price, "Breakeven exit triggered");
            ExitReason::Breakeven
        } else {
            ExitReason::None
        };

        ExitSignal {
            reason,
            take_profit,
            breakeven,
        }
    }
}

/// Whether `price` is at or beyond `level` in the position's favour.
fn reached(side: PositionSide, price: Decimal, level: Decimal) -> bool {
    match side {
        PositionSide::Long => price >= level,
        PositionSide::Short => price <= level,
    }
}

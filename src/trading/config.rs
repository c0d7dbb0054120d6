//! Strategy configuration.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Parameters of the EMA pullback strategy and its position management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Traded symbol, e.g. "BTCUSDT"
    pub symbol: String,

    /// Kline interval in exchange notation ("1", "5", "60", "D", ...)
    pub interval: String,

    /// Fast EMA window
    pub ema_fast: usize,

    /// Slow EMA window
    pub ema_slow: usize,

    /// Extra candles fetched beyond the longest window
    pub warmup_buffer: usize,

    /// Fraction of balance used for the base entry order (0.0 to 1.0)
    pub allocation: Decimal,

    /// Take-profit distance from average entry as a fraction
    pub take_profit_rate: Decimal,

    /// Commission rate used for the breakeven exit
    pub commission_rate: Decimal,

    /// Size multipliers applied to the base order at each DCA level
    pub dca_grid: Vec<Decimal>,

    /// Price distance of the first DCA level; doubles per level
    pub dca_step: Decimal,

    /// Never open short positions
    pub long_only: bool,

    /// Seconds an entry limit order may stay unfilled before it is cancelled (0 disables)
    pub entry_order_timeout_secs: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "1".to_string(),
            ema_fast: 9,
            ema_slow: 21,
            warmup_buffer: 10,
            allocation: dec!(0.1),          // 10% of balance per entry
            take_profit_rate: dec!(0.01),   // 1% from average entry
            commission_rate: dec!(0.001),
            dca_grid: vec![dec!(1), dec!(2), dec!(4)],
            dca_step: dec!(50),
            long_only: false,
            entry_order_timeout_secs: 300,
        }
    }
}

impl StrategyConfig {
    /// Number of candles requested per tick.
    pub fn candle_limit(&self) -> usize {
        self.ema_fast.max(self.ema_slow) + self.warmup_buffer
    }

    /// Reject parameter combinations the engine cannot trade with.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            bail!("symbol must not be empty");
        }
        if self.ema_fast == 0 || self.ema_slow == 0 {
            bail!("EMA windows must be positive");
        }
        if self.ema_fast >= self.ema_slow {
            bail!(
                "fast EMA window ({}) must be shorter than slow window ({})",
                self.ema_fast,
                self.ema_slow
            );
        }
        if self.allocation <= Decimal::ZERO || self.allocation > Decimal::ONE {
            bail!("allocation must be in (0, 1], got {}", self.allocation);
        }
        if self.take_profit_rate <= Decimal::ZERO {
            bail!("take-profit rate must be positive");
        }
        if self.commission_rate < Decimal::ZERO {
            bail!("commission rate must not be negative");
        }
        if self.dca_step <= Decimal::ZERO {
            bail!("DCA step must be positive");
        }
        if self.dca_grid.iter().any(|m| *m <= Decimal::ZERO) {
            bail!("DCA multipliers must be positive");
        }
        Ok(())
    }
}

/// Parse a comma-separated multiplier list such as "1,2,4".
pub fn parse_grid(s: &str) -> Result<Vec<Decimal>> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<Decimal>()
                .map_err(|e| anyhow::anyhow!("invalid DCA multiplier '{}': {}", p, e))
        })
        .collect()
}

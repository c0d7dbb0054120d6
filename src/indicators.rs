//! Exponential moving averages over candle closes.
//!
//! The series is seeded with the first close and smoothed with
//! `alpha = 2 / (period + 1)`. Values before the `period`-th candle are
//! reported as `None` so callers cannot act on an average that has not seen
//! enough history.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::models::{Candle, IndicatorBar};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("insufficient history: need {needed} bars with both averages defined, got {available}")]
    InsufficientHistory { needed: usize, available: usize },
}

/// EMA of `values`, aligned by index. Undefined entries are `None`.
pub fn ema_series(values: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    let alpha = dec!(2) / Decimal::from(period + 1);
    let mut out = Vec::with_capacity(values.len());
    let mut ema: Option<Decimal> = None;

    for (i, value) in values.iter().enumerate() {
        let next = match ema {
            None => *value,
            Some(prev) => prev + alpha * (*value - prev),
        };
        ema = Some(next);
        out.push(if i + 1 >= period { Some(next) } else { None });
    }

    out
}

/// Build fast/slow indicator bars aligned one-to-one with `candles`.
pub fn indicator_bars(candles: &[Candle], fast: usize, slow: usize) -> Vec<Option<IndicatorBar>> {
    let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
    let fast_ema = ema_series(&closes, fast);
    let slow_ema = ema_series(&closes, slow);

    candles
        .iter()
        .zip(fast_ema.into_iter().zip(slow_ema))
        .map(|(candle, pair)| match pair {
            (Some(ema_fast), Some(ema_slow)) => Some(IndicatorBar {
                open_time: candle.open_time,
                close: candle.close,
                ema_fast,
                ema_slow,
            }),
            _ => None,
        })
        .collect()
}

/// The two most recently closed bars as `(previous, closed)`.
///
/// The last entry is the candle still forming and is skipped.
pub fn closed_pair(bars: &[Option<IndicatorBar>]) -> Result<(IndicatorBar, IndicatorBar), IndicatorError> {
    let insufficient = || IndicatorError::InsufficientHistory {
        needed: 3,
        available: bars.iter().filter(|b| b.is_some()).count(),
    };

    if bars.len() < 3 {
        return Err(insufficient());
    }

    let n = bars.len();
    match (bars[n - 3], bars[n - 2]) {
        (Some(previous), Some(closed)) => Ok((previous, closed)),
        _ => Err(insufficient()),
    }
}

/// The most recently closed bar, if its averages are defined.
pub fn last_closed(bars: &[Option<IndicatorBar>]) -> Option<IndicatorBar> {
    bars.len().checked_sub(2).and_then(|i| bars[i])
}

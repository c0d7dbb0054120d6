//! DCA grid: escalating add-to-position levels below (long) or above (short)
//! the entry price.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::PositionSide;

/// Distance from the base price to level `index`: `sum(step * 2^k, k = 0..=index)`.
pub fn cumulative_distance(step: Decimal, index: usize) -> Decimal {
    let mut distance = Decimal::ZERO;
    let mut leg = step;
    for _ in 0..=index {
        distance += leg;
        leg *= dec!(2);
    }
    distance
}

/// Price at which level `index` fires.
pub fn trigger_price(side: PositionSide, base_price: Decimal, step: Decimal, index: usize) -> Decimal {
    let distance = cumulative_distance(step, index);
    match side {
        PositionSide::Long => base_price - distance,
        PositionSide::Short => base_price + distance,
    }
}

/// Whether `price` has moved far enough against the position to hit `trigger`.
pub fn is_triggered(side: PositionSide, price: Decimal, trigger: Decimal) -> bool {
    match side {
        PositionSide::Long => price <= trigger,
        PositionSide::Short => price >= trigger,
    }
}

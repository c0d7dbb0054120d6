//! Order quantity sizing from balance, allocation and instrument granularity.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::SymbolSpec;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizingError {
    #[error("order quantity {qty} is below the instrument minimum {min_qty}")]
    QuantityBelowMinimum { qty: Decimal, min_qty: Decimal },

    #[error("cannot size an order at non-positive price {0}")]
    InvalidPrice(Decimal),
}

/// Base entry quantity: `floor(balance * allocation / price / qty_step) * qty_step`.
pub fn calc_order_qty(
    balance: Decimal,
    allocation: Decimal,
    price: Decimal,
    spec: &SymbolSpec,
) -> Result<Decimal, SizingError> {
    if price <= Decimal::ZERO {
        return Err(SizingError::InvalidPrice(price));
    }

    let qty = spec.floor_qty(balance * allocation / price);
    ensure_minimum(qty, spec)
}

/// Quantity for a DCA add: the base quantity scaled by the level's multiplier.
pub fn scaled_order_qty(
    base_qty: Decimal,
    multiplier: Decimal,
    spec: &SymbolSpec,
) -> Result<Decimal, SizingError> {
    ensure_minimum(spec.floor_qty(base_qty * multiplier), spec)
}

fn ensure_minimum(qty: Decimal, spec: &SymbolSpec) -> Result<Decimal, SizingError> {
    if qty < spec.min_qty || qty.is_zero() {
        return Err(SizingError::QuantityBelowMinimum {
            qty,
            min_qty: spec.min_qty,
        });
    }
    Ok(qty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec(min_qty: Decimal) -> SymbolSpec {
        SymbolSpec {
            min_qty,
            qty_step: dec!(0.001),
            tick_size: dec!(0.1),
        }
    }

    #[test]
    fn test_base_quantity() {
        let qty = calc_order_qty(dec!(1000), dec!(0.1), dec!(30000), &spec(dec!(0.001))).unwrap();
        assert_eq!(qty, dec!(0.003));
    }

    #[test]
    fn test_below_minimum() {
        let result = calc_order_qty(dec!(1000), dec!(0.1), dec!(30000), &spec(dec!(0.01)));
        assert_eq!(
            result,
            Err(SizingError::QuantityBelowMinimum {
                qty: dec!(0.003),
                min_qty: dec!(0.01),
            })
        );
    }

    #[test]
    fn test_zero_price_rejected() {
        assert!(matches!(
            calc_order_qty(dec!(1000), dec!(0.1), Decimal::ZERO, &spec(dec!(0.001))),
            Err(SizingError::InvalidPrice(_))
        ));
    }

    #[test]
    fn test_scaled_quantity_floors_to_step() {
        let qty = scaled_order_qty(dec!(0.003), dec!(1.5), &spec(dec!(0.001))).unwrap();
        // 0.0045 floors to 0.004
        assert_eq!(qty, dec!(0.004));
        assert_eq!(scaled_order_qty(dec!(0.003), dec!(4), &spec(dec!(0.001))).unwrap(), dec!(0.012));
    }
}

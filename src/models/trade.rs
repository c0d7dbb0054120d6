//! Order direction as understood by the exchange.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Wire name used by the Bybit API.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }

    /// The side that offsets this one.
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Parse the exchange's side field. Anything else (including the empty
    /// string Bybit reports for a flat position) is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Buy" => Some(OrderSide::Buy),
            "Sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parsing() {
        assert_eq!(OrderSide::parse("Buy"), Some(OrderSide::Buy));
        assert_eq!(OrderSide::parse("Sell"), Some(OrderSide::Sell));
        assert_eq!(OrderSide::parse(""), None);
        assert_eq!(OrderSide::parse("None"), None);
    }

    #[test]
    fn test_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }
}

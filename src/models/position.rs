//! Position models: the direction of a held position, the exchange's view of
//! it, and a size-weighted net position used by the paper exchange.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::OrderSide;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that opens or adds to this position.
    pub fn order_side(&self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces or closes this position.
    pub fn closing_side(&self) -> OrderSide {
        self.order_side().opposite()
    }

    pub fn from_order_side(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Position as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExchangePosition {
    /// Absolute size in contracts, zero when flat
    pub size: Decimal,

    /// `None` when flat
    pub side: Option<PositionSide>,
}

impl ExchangePosition {
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }
}

/// A single net position with a size-weighted average entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetPosition {
    pub side: PositionSide,

    /// Contracts held
    pub size: Decimal,

    /// Average entry price
    pub average_price: Decimal,

    /// Last time this position changed
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl NetPosition {
    pub fn new(side: PositionSide, size: Decimal, price: Decimal) -> Self {
        Self {
            side,
            size,
            average_price: price,
            last_updated: Utc::now(),
        }
    }

    /// Add to the position (averaging in).
    pub fn add(&mut self, size: Decimal, price: Decimal) {
        let total_cost = self.size * self.average_price + size * price;
        let new_size = self.size + size;

        if !new_size.is_zero() {
            self.average_price = total_cost / new_size;
        }

        self.size = new_size;
        self.last_updated = Utc::now();
    }

    /// Reduce the position at `price`, returning the realized PnL.
    pub fn reduce(&mut self, size: Decimal, price: Decimal) -> Decimal {
        let reduce_size = size.min(self.size);
        let realized_pnl = reduce_size * self.price_move(price);

        self.size -= reduce_size;
        self.last_updated = Utc::now();

        realized_pnl
    }

    /// PnL of the whole position if marked at `price`.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.size * self.price_move(price)
    }

    pub fn is_closed(&self) -> bool {
        self.size.is_zero()
    }

    fn price_move(&self, price: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => price - self.average_price,
            PositionSide::Short => self.average_price - price,
        }
    }
}

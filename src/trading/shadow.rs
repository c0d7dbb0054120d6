//! The engine's local belief about the open position.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{PositionSide, Trend};

/// Once-per-position operator message guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Notice {
    #[default]
    Disarmed,
    Armed,
    Fired,
}

impl Notice {
    pub fn arm(&mut self) {
        *self = Notice::Armed;
    }

    /// Move an armed notice to fired. Returns true when the message should go out.
    pub fn fire(&mut self) -> bool {
        if *self == Notice::Armed {
            *self = Notice::Fired;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Notices {
    /// Take-profit target announced
    pub take_profit: Notice,

    /// Next DCA level announced
    pub dca_level: Notice,

    /// Trend turned against the position
    pub trend_change: Notice,

    /// Breakeven close announced
    pub breakeven: Notice,
}

impl Notices {
    pub fn arm_all(&mut self) {
        self.take_profit.arm();
        self.dca_level.arm();
        self.trend_change.arm();
        self.breakeven.arm();
    }

    #[cfg(test)]
    pub fn all_disarmed(&self) -> bool {
        *self == Notices::default()
    }
}

/// What the engine believes about its position between ticks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShadowPosition {
    pub side: Option<PositionSide>,

    /// Close of the signal bar; DCA levels are measured from here
    pub base_price: Decimal,

    /// Quantity of the entry order; DCA adds are multiples of it
    pub base_qty: Decimal,

    /// Next DCA level to fill
    pub dca_index: usize,

    /// Entry limit order submitted and not yet seen as a position
    pub limit_order_pending: bool,
    pub pending_since: Option<DateTime<Utc>>,

    pub notices: Notices,

    pub last_seen_candle_time: Option<DateTime<Utc>>,
    pub last_trend: Option<Trend>,
}

impl ShadowPosition {
    pub fn in_position(&self) -> bool {
        self.side.is_some()
    }

    /// Record a freshly submitted entry.
    pub fn open(
        &mut self,
        side: PositionSide,
        base_price: Decimal,
        base_qty: Decimal,
        order_accepted: bool,
        now: DateTime<Utc>,
    ) {
        self.side = Some(side);
        self.base_price = base_price;
        self.base_qty = base_qty;
        self.dca_index = 0;
        self.limit_order_pending = order_accepted;
        self.pending_since = order_accepted.then_some(now);
        self.notices.arm_all();
    }

    /// Back to flat. Candle bookkeeping and trend survive a reset.
    pub fn reset(&mut self) {
        self.side = None;
        self.base_price = Decimal::ZERO;
        self.base_qty = Decimal::ZERO;
        self.dca_index = 0;
        self.limit_order_pending = false;
        self.pending_since = None;
        self.notices = Notices::default();
    }

    pub fn confirm_fill(&mut self) {
        self.limit_order_pending = false;
        self.pending_since = None;
    }

    /// Whether the flat-state invariant holds.
    #[cfg(test)]
    pub fn is_clean_flat(&self) -> bool {
        self.side.is_none()
            && self.dca_index == 0
            && self.base_price.is_zero()
            && self.base_qty.is_zero()
            && !self.limit_order_pending
            && self.pending_since.is_none()
            && self.notices.all_disarmed()
    }
}

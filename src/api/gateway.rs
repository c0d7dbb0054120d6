//! Seams between the trading engine and the outside world.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{Candle, ExchangePosition, OrderSide, SymbolSpec};

/// Read-only market data for one venue.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Recent candles in ascending open-time order; the last one is still forming.
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal>;

    /// Best bid and best ask.
    async fn get_best_bid_ask(&self, symbol: &str) -> Result<(Decimal, Decimal)>;

    /// Quantity and price granularity of the instrument.
    async fn get_symbol_spec(&self, symbol: &str) -> Result<SymbolSpec>;
}

/// Account and order operations on a derivatives venue.
#[async_trait]
pub trait ExchangeGateway: MarketData {
    /// Account equity in USDT.
    async fn get_balance(&self) -> Result<Decimal>;

    async fn get_position(&self, symbol: &str) -> Result<ExchangePosition>;

    async fn get_avg_entry_price(&self, symbol: &str) -> Result<Decimal>;

    async fn get_unrealized_pnl(&self, symbol: &str) -> Result<Decimal>;

    /// Post a limit order one tick inside the spread. Returns whether the venue accepted it.
    async fn place_limit_best(&self, side: OrderSide, qty: Decimal, symbol: &str) -> Result<bool>;

    async fn place_market(&self, side: OrderSide, qty: Decimal, symbol: &str) -> Result<()>;

    /// Flatten the whole position with a market order. No-op when flat.
    async fn close_position(&self, symbol: &str) -> Result<()>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()>;
}

/// Limit price one tick inside the spread, rounded to the tick size.
pub fn best_limit_price(side: OrderSide, bid: Decimal, ask: Decimal, spec: &SymbolSpec) -> Decimal {
    let raw = match side {
        OrderSide::Buy => bid + spec.tick_size,
        OrderSide::Sell => ask - spec.tick_size,
    };
    spec.round_price(raw)
}

/// Fire-and-forget delivery of operator messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

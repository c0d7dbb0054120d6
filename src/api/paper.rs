//! Paper exchange: simulated fills against live market data.
//!
//! Limit orders rest until the last traded price crosses them and then fill at
//! the limit price. Market orders fill immediately at the last price adjusted
//! for slippage. Every fill pays `fee_rate` on its notional.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{Candle, ExchangePosition, NetPosition, OrderSide, PositionSide, SymbolSpec};

use super::gateway::{best_limit_price, ExchangeGateway, MarketData};

/// Paper trading configuration.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Starting balance in USDT
    pub initial_balance: Decimal,

    /// Fee charged on every fill
    pub fee_rate: Decimal,

    /// Adverse price adjustment on market fills
    pub slippage: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            fee_rate: dec!(0.001),
            slippage: dec!(0.0005),
        }
    }
}

#[derive(Debug, Clone)]
struct RestingOrder {
    id: Uuid,
    symbol: String,
    side: OrderSide,
    qty: Decimal,
    price: Decimal,
}

impl RestingOrder {
    fn crossed_by(&self, last_price: Decimal) -> bool {
        match self.side {
            OrderSide::Buy => last_price <= self.price,
            OrderSide::Sell => last_price >= self.price,
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    /// Balance with realized PnL and fees applied
    cash: Decimal,
    positions: HashMap<String, NetPosition>,
    orders: Vec<RestingOrder>,
    total_fees: Decimal,
}

impl PaperState {
    /// Fill any resting order for `symbol` that `last_price` has crossed.
    fn settle(&mut self, symbol: &str, last_price: Decimal, fee_rate: Decimal) {
        let (filled, resting): (Vec<_>, Vec<_>) = self
            .orders
            .drain(..)
            .partition(|o| o.symbol == symbol && o.crossed_by(last_price));
        self.orders = resting;

        for order in filled {
            debug!(id = %order.id, side = %order.side, qty = %order.qty, price = %order.price, "Paper limit order filled");
            self.fill(&order.symbol, order.side, order.qty, order.price, fee_rate);
        }
    }

    fn fill(&mut self, symbol: &str, side: OrderSide, qty: Decimal, price: Decimal, fee_rate: Decimal) {
        let fee = qty * price * fee_rate;
        self.cash -= fee;
        self.total_fees += fee;

        let fill_side = PositionSide::from_order_side(side);
        let mut remaining = qty;

        if let Some(pos) = self.positions.get_mut(symbol) {
            if pos.side == fill_side {
                pos.add(qty, price);
                return;
            }

            let closing = remaining.min(pos.size);
            self.cash += pos.reduce(closing, price);
            remaining -= closing;

            if pos.is_closed() {
                self.positions.remove(symbol);
            }
        }

        if remaining > Decimal::ZERO {
            self.positions
                .insert(symbol.to_string(), NetPosition::new(fill_side, remaining, price));
        }
    }
}

/// Simulated execution gateway.
pub struct PaperExchange {
    market: Arc<dyn MarketData>,
    config: PaperConfig,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn MarketData>, config: PaperConfig) -> Self {
        let state = PaperState {
            cash: config.initial_balance,
            ..Default::default()
        };
        Self {
            market,
            config,
            state: Mutex::new(state),
        }
    }

    /// Fetch the last price and settle resting orders against it.
    async fn refresh(&self, symbol: &str) -> Result<Decimal> {
        let last = self.market.get_last_price(symbol).await?;
        self.state
            .lock()
            .await
            .settle(symbol, last, self.config.fee_rate);
        Ok(last)
    }

    #[cfg(test)]
    pub async fn total_fees(&self) -> Decimal {
        self.state.lock().await.total_fees
    }
}

#[async_trait]
impl MarketData for PaperExchange {
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.market.fetch_candles(symbol, interval, limit).await
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal> {
        self.refresh(symbol).await
    }

    async fn get_best_bid_ask(&self, symbol: &str) -> Result<(Decimal, Decimal)> {
        self.market.get_best_bid_ask(symbol).await
    }

    async fn get_symbol_spec(&self, symbol: &str) -> Result<SymbolSpec> {
        self.market.get_symbol_spec(symbol).await
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn get_balance(&self) -> Result<Decimal> {
        let symbols: Vec<String> = self.state.lock().await.positions.keys().cloned().collect();

        let mut unrealized = Decimal::ZERO;
        for symbol in symbols {
            let last = self.refresh(&symbol).await?;
            if let Some(pos) = self.state.lock().await.positions.get(&symbol) {
                unrealized += pos.unrealized_pnl(last);
            }
        }

        Ok(self.state.lock().await.cash + unrealized)
    }

    async fn get_position(&self, symbol: &str) -> Result<ExchangePosition> {
        self.refresh(symbol).await?;
        let state = self.state.lock().await;
        Ok(match state.positions.get(symbol) {
            Some(pos) => ExchangePosition {
                size: pos.size,
                side: Some(pos.side),
            },
            None => ExchangePosition::flat(),
        })
    }

    async fn get_avg_entry_price(&self, symbol: &str) -> Result<Decimal> {
        self.refresh(symbol).await?;
        let state = self.state.lock().await;
        Ok(state
            .positions
            .get(symbol)
            .map(|p| p.average_price)
            .unwrap_or_default())
    }

    async fn get_unrealized_pnl(&self, symbol: &str) -> Result<Decimal> {
        let last = self.refresh(symbol).await?;
        let state = self.state.lock().await;
        Ok(state
            .positions
            .get(symbol)
            .map(|p| p.unrealized_pnl(last))
            .unwrap_or_default())
    }

    async fn place_limit_best(&self, side: OrderSide, qty: Decimal, symbol: &str) -> Result<bool> {
        if qty <= Decimal::ZERO {
            return Ok(false);
        }

        let spec = self.market.get_symbol_spec(symbol).await?;
        let (bid, ask) = self.market.get_best_bid_ask(symbol).await?;
        let price = best_limit_price(side, bid, ask, &spec);

        let order = RestingOrder {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            qty,
            price,
        };
        info!(id = %order.id, side = %side, qty = %qty, price = %price, "Paper limit order placed");
        self.state.lock().await.orders.push(order);

        self.refresh(symbol).await?;
        Ok(true)
    }

    async fn place_market(&self, side: OrderSide, qty: Decimal, symbol: &str) -> Result<()> {
        let last = self.refresh(symbol).await?;
        let price = match side {
            OrderSide::Buy => last * (Decimal::ONE + self.config.slippage),
            OrderSide::Sell => last * (Decimal::ONE - self.config.slippage),
        };

        info!(side = %side, qty = %qty, price = %price, "Paper market order filled");
        self.state
            .lock()
            .await
            .fill(symbol, side, qty, price, self.config.fee_rate);
        Ok(())
    }

    async fn close_position(&self, symbol: &str) -> Result<()> {
        let position = self.get_position(symbol).await?;
        let Some(side) = position.side else {
            return Ok(());
        };
        self.place_market(side.closing_side(), position.size, symbol).await
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let before = state.orders.len();
        state.orders.retain(|o| o.symbol != symbol);
        debug!(symbol = %symbol, cancelled = before - state.orders.len(), "Paper orders cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeMarket {
        last: StdMutex<Decimal>,
        spread: (Decimal, Decimal),
    }

    impl FakeMarket {
        fn new(last: Decimal, bid: Decimal, ask: Decimal) -> Arc<Self> {
            Arc::new(Self {
                last: StdMutex::new(last),
                spread: (bid, ask),
            })
        }

        fn set_last(&self, price: Decimal) {
            *self.last.lock().unwrap() = price;
        }
    }

    #[async_trait]
    impl MarketData for FakeMarket {
        async fn fetch_candles(&self, _symbol: &str, _interval: &str, _limit: usize) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn get_last_price(&self, _symbol: &str) -> Result<Decimal> {
            Ok(*self.last.lock().unwrap())
        }

        async fn get_best_bid_ask(&self, _symbol: &str) -> Result<(Decimal, Decimal)> {
            Ok(self.spread)
        }

        async fn get_symbol_spec(&self, _symbol: &str) -> Result<SymbolSpec> {
            Ok(SymbolSpec {
                min_qty: dec!(0.001),
                qty_step: dec!(0.001),
                tick_size: dec!(0.1),
            })
        }
    }

    fn exchange(market: &Arc<FakeMarket>) -> PaperExchange {
        PaperExchange::new(
            market.clone(),
            PaperConfig {
                initial_balance: dec!(1000),
                fee_rate: dec!(0.001),
                slippage: Decimal::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn test_limit_order_rests_until_crossed() {
        let market = FakeMarket::new(dec!(30000.5), dec!(30000), dec!(30001));
        let paper = exchange(&market);

        // Buy rests at bid + tick = 30000.1
        assert!(paper.place_limit_best(OrderSide::Buy, dec!(0.01), "BTCUSDT").await.unwrap());
        assert!(paper.get_position("BTCUSDT").await.unwrap().is_flat());

        market.set_last(dec!(30000.1));
        let position = paper.get_position("BTCUSDT").await.unwrap();
        assert_eq!(position.size, dec!(0.01));
        assert_eq!(position.side, Some(PositionSide::Long));
        assert_eq!(paper.get_avg_entry_price("BTCUSDT").await.unwrap(), dec!(30000.1));
    }

    #[tokio::test]
    async fn test_cancel_all_removes_resting_orders() {
        let market = FakeMarket::new(dec!(30010), dec!(30000), dec!(30001));
        let paper = exchange(&market);

        paper.place_limit_best(OrderSide::Buy, dec!(0.01), "BTCUSDT").await.unwrap();
        paper.cancel_all_orders("BTCUSDT").await.unwrap();

        market.set_last(dec!(29000));
        assert!(paper.get_position("BTCUSDT").await.unwrap().is_flat());
    }

    #[tokio::test]
    async fn test_round_trip_realizes_pnl_and_fees() {
        let market = FakeMarket::new(dec!(100), dec!(100), dec!(100));
        let paper = exchange(&market);

        paper.place_market(OrderSide::Buy, dec!(2), "BTCUSDT").await.unwrap();
        market.set_last(dec!(110));
        assert_eq!(paper.get_unrealized_pnl("BTCUSDT").await.unwrap(), dec!(20));

        paper.close_position("BTCUSDT").await.unwrap();

        // 1000 + 20 profit - 0.2 entry fee - 0.22 exit fee
        assert_eq!(paper.get_balance().await.unwrap(), dec!(1019.58));
        assert!(paper.get_position("BTCUSDT").await.unwrap().is_flat());
        assert_eq!(paper.total_fees().await, dec!(0.42));
    }

    #[tokio::test]
    async fn test_adds_average_the_entry() {
        let market = FakeMarket::new(dec!(100), dec!(100), dec!(100));
        let paper = exchange(&market);

        paper.place_market(OrderSide::Sell, dec!(1), "BTCUSDT").await.unwrap();
        market.set_last(dec!(110));
        paper.place_market(OrderSide::Sell, dec!(3), "BTCUSDT").await.unwrap();

        let position = paper.get_position("BTCUSDT").await.unwrap();
        assert_eq!(position.side, Some(PositionSide::Short));
        assert_eq!(position.size, dec!(4));
        assert_eq!(paper.get_avg_entry_price("BTCUSDT").await.unwrap(), dec!(107.5));
    }

    #[tokio::test]
    async fn test_close_when_flat_is_noop() {
        let market = FakeMarket::new(dec!(100), dec!(100), dec!(100));
        let paper = exchange(&market);

        paper.close_position("BTCUSDT").await.unwrap();
        assert_eq!(paper.get_balance().await.unwrap(), dec!(1000));
    }
}

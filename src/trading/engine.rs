//! Position lifecycle engine: turns candles and exchange-reported position
//! facts into entry, exit and add-to-position actions.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::api::{ExchangeGateway, Notifier};
use crate::indicators::{closed_pair, indicator_bars, last_closed};
use crate::models::{ExchangePosition, IndicatorBar, PositionSide, Trend};

use super::dca;
use super::position_sizer::{calc_order_qty, scaled_order_qty};
use super::shadow::ShadowPosition;
use super::strategy::{classify_trend, detect_new_close, ExitReason, Strategy};
use super::StrategyConfig;

/// Outcome of comparing the shadow position with the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Engine holds no position
    Flat,
    /// Exchange is flat and no entry order is pending; shadow state was reset
    Vanished,
    /// Entry order submitted but not yet filled
    AwaitingFill,
    /// Exchange holds the position
    Confirmed(ExchangePosition),
}

/// Latest closed bars and what the entry rules make of them.
#[derive(Debug, Clone, Serialize)]
pub struct SignalReport {
    pub previous: IndicatorBar,
    pub closed: IndicatorBar,
    pub trend: Trend,
    pub entry: Option<PositionSide>,
}

/// Position lifecycle and signal engine.
pub struct Engine {
    strategy: Strategy,
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    state: ShadowPosition,

    /// Forced close already done for the current stop
    stopped: bool,
}

impl Engine {
    pub fn new(
        config: StrategyConfig,
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            strategy: Strategy::new(config),
            gateway,
            notifier,
            state: ShadowPosition::default(),
            stopped: true,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        self.strategy.config()
    }

    pub fn state(&self) -> &ShadowPosition {
        &self.state
    }

    /// One control-loop iteration.
    ///
    /// While enabled, errors are logged and reported but never returned. The
    /// first call after the flag drops flattens everything exactly once.
    pub async fn run(&mut self, enabled: bool) {
        if enabled {
            self.stopped = false;
            if let Err(e) = self.tick().await {
                error!(error = %e, "Tick failed");
                self.notify(&format!("[ERROR] {}", e)).await;
            }
            return;
        }

        if self.stopped {
            return;
        }

        match self.flatten().await {
            Ok(()) => {
                info!("Trading stopped, position flattened");
                self.notify("[STOP TRADING] Trading stopped. All positions closed").await;
                self.stopped = true;
            }
            Err(e) => {
                error!(error = %e, "Failed to flatten on stop, will retry");
                self.notify(&format!("[ERROR] {}", e)).await;
            }
        }
    }

    /// Cancel open orders, close the position and reset the shadow state.
    pub async fn flatten(&mut self) -> Result<()> {
        let symbol = self.config().symbol.clone();
        self.gateway.cancel_all_orders(&symbol).await?;
        self.gateway.close_position(&symbol).await?;
        self.state.reset();
        Ok(())
    }

    async fn tick(&mut self) -> Result<()> {
        let config = self.config().clone();

        let candles = self
            .gateway
            .fetch_candles(&config.symbol, &config.interval, config.candle_limit())
            .await?;
        let bars = indicator_bars(&candles, config.ema_fast, config.ema_slow);

        if let Some(bar) = last_closed(&bars) {
            self.state.last_trend = Some(classify_trend(&bar));
        }

        if detect_new_close(&candles, &mut self.state.last_seen_candle_time) {
            self.check_entry(&bars).await?;
        }

        if !self.state.in_position() {
            return Ok(());
        }

        let position = self.gateway.get_position(&config.symbol).await?;
        match self.reconcile(position) {
            Reconciliation::Confirmed(position) => {
                let price = self.gateway.get_last_price(&config.symbol).await?;
                self.check_exit(position, price).await?;
                self.check_dca(price).await?;
            }
            Reconciliation::AwaitingFill => self.check_entry_timeout().await?,
            Reconciliation::Flat | Reconciliation::Vanished => {}
        }

        Ok(())
    }

    // ==================== Reconciliation ====================

    /// The exchange decides whether a position exists.
    pub fn reconcile(&mut self, position: ExchangePosition) -> Reconciliation {
        if !self.state.in_position() {
            return Reconciliation::Flat;
        }

        if position.is_flat() {
            if self.state.limit_order_pending {
                return Reconciliation::AwaitingFill;
            }
            info!(side = ?self.state.side, "Position no longer on exchange, resetting");
            self.state.reset();
            return Reconciliation::Vanished;
        }

        if self.state.limit_order_pending {
            debug!(size = %position.size, "Entry order filled");
            self.state.confirm_fill();
        }
        Reconciliation::Confirmed(position)
    }

    // ==================== Entry ====================

    async fn check_entry(&mut self, bars: &[Option<IndicatorBar>]) -> Result<()> {
        if self.state.in_position() {
            return Ok(());
        }

        let (previous, closed) = match closed_pair(bars) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Skipping entry evaluation");
                return Ok(());
            }
        };

        let Some(side) = self.strategy.entry_signal(&previous, &closed) else {
            return Ok(());
        };

        let config = self.config().clone();
        let spec = self.gateway.get_symbol_spec(&config.symbol).await?;
        let balance = self.gateway.get_balance().await?;
        let price = self.gateway.get_last_price(&config.symbol).await?;

        let qty = match calc_order_qty(balance, config.allocation, price, &spec) {
            Ok(qty) => qty,
            Err(e) => {
                warn!(side = %side, balance = %balance, price = %price, error = %e, "Entry abandoned");
                self.notify(&format!("[ENTRY] {} signal skipped: {}", side, e)).await;
                return Ok(());
            }
        };

        let accepted = self
            .gateway
            .place_limit_best(side.order_side(), qty, &config.symbol)
            .await?;

        self.state.open(side, closed.close, qty, accepted, Utc::now());

        info!(
            side = %side,
            qty = %qty,
            base_price = %closed.close,
            accepted = accepted,
            "Entry order submitted"
        );
        self.notify_event(&format!("[ENTRY] {} signal. Size {}", side, qty)).await;

        Ok(())
    }

    /// Cancel an entry order that never filled.
    async fn check_entry_timeout(&mut self) -> Result<()> {
        let timeout_secs = self.config().entry_order_timeout_secs;
        if timeout_secs == 0 {
            return Ok(());
        }

        let Some(since) = self.state.pending_since else {
            return Ok(());
        };

        let waited_secs = (Utc::now() - since).num_seconds();
        if waited_secs <= i64::try_from(timeout_secs).unwrap_or(i64::MAX) {
            return Ok(());
        }

        let symbol = self.config().symbol.clone();
        self.gateway.cancel_all_orders(&symbol).await?;

        // The order may have filled between the position query and the cancel
        let position = self.gateway.get_position(&symbol).await?;
        if !position.is_flat() {
            info!(size = %position.size, waited_secs, "Entry order filled before cancel, keeping position");
            self.state.confirm_fill();
            return Ok(());
        }

        warn!(side = ?self.state.side, waited_secs, timeout_secs, "Entry order not filled, cancelled");
        let side = self.state.side;
        self.state.reset();

        if let Some(side) = side {
            self.notify_event(&format!("[ENTRY TIMEOUT] {} order not filled, cancelled", side))
                .await;
        }

        Ok(())
    }

    // ==================== Exit ====================

    async fn check_exit(&mut self, position: ExchangePosition, price: Decimal) -> Result<()> {
        let Some(side) = position.side.or(self.state.side) else {
            return Ok(());
        };

        let symbol = self.config().symbol.clone();
        let avg_price = self.gateway.get_avg_entry_price(&symbol).await?;
        let signal = self
            .strategy
            .check_exit(side, avg_price, price, self.state.last_trend);

        if self.state.notices.take_profit.fire() {
            self.notify(&format!("Take profit target {}", signal.take_profit)).await;
        }

        if let Some(exit_price) = signal.breakeven {
            if self.state.notices.trend_change.fire() {
                info!(side = %side, exit_price = %exit_price, "Trend turned against position");
                self.notify(&format!("[TREND CHANGE] {} breakeven exit at {}", side, exit_price))
                    .await;
            }
        }

        let label = match signal.reason {
            ExitReason::TakeProfit => "TP Exit",
            ExitReason::Breakeven => "TP Not Loss",
            ExitReason::None => return Ok(()),
        };

        self.gateway.cancel_all_orders(&symbol).await?;
        self.gateway.close_position(&symbol).await?;
        info!(side = %side, price = %price, avg_price = %avg_price, reason = label, "Position closed");

        let announce = match signal.reason {
            ExitReason::Breakeven => self.state.notices.breakeven.fire(),
            _ => true,
        };
        self.state.reset();

        if announce {
            self.notify_event(&format!(
                "[{}] Closing {} at {} (avg: {})",
                label, side, price, avg_price
            ))
            .await;
        }

        Ok(())
    }

    // ==================== DCA ====================

    async fn check_dca(&mut self, price: Decimal) -> Result<()> {
        let Some(side) = self.state.side else {
            return Ok(());
        };

        let config = self.config().clone();
        let index = self.state.dca_index;
        let Some(factor) = config.dca_grid.get(index).copied() else {
            return Ok(());
        };

        let trigger = dca::trigger_price(side, self.state.base_price, config.dca_step, index);

        if self.state.notices.dca_level.fire() {
            debug!(level = index + 1, trigger = %trigger, "DCA level armed");
            self.notify(&format!("[DCA level {}] Add {} at {}", index + 1, side, trigger))
                .await;
        }

        if !dca::is_triggered(side, price, trigger) {
            return Ok(());
        }

        let spec = self.gateway.get_symbol_spec(&config.symbol).await?;
        let qty = match scaled_order_qty(self.state.base_qty, factor, &spec) {
            Ok(qty) => qty,
            Err(e) => {
                warn!(side = %side, level = index + 1, factor = %factor, error = %e, "DCA level skipped");
                self.state.dca_index += 1;
                self.state.notices.dca_level.arm();
                self.notify(&format!("[DCA level {}] skipped: {}", index + 1, e)).await;
                return Ok(());
            }
        };

        self.gateway
            .place_limit_best(side.order_side(), qty, &config.symbol)
            .await?;

        self.state.dca_index += 1;
        self.state.notices.dca_level.arm();

        info!(side = %side, level = index + 1, factor = %factor, qty = %qty, price = %price, "DCA order submitted");
        self.notify_event(&format!("[DCA level] Add {} x{} at {}", side, factor, price))
            .await;

        Ok(())
    }

    // ==================== Queries ====================

    /// Evaluate the entry rules on the latest closed bars without trading.
    pub async fn latest_signal(&self) -> Result<SignalReport> {
        let config = self.config();
        let candles = self
            .gateway
            .fetch_candles(&config.symbol, &config.interval, config.candle_limit())
            .await?;
        let bars = indicator_bars(&candles, config.ema_fast, config.ema_slow);
        let (previous, closed) = closed_pair(&bars)?;

        Ok(SignalReport {
            previous,
            closed,
            trend: classify_trend(&closed),
            entry: self.strategy.entry_signal(&previous, &closed),
        })
    }

    // ==================== Notifications ====================

    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.send(text).await {
            warn!(error = %e, "Failed to deliver notification");
        }
    }

    async fn notify_event(&self, text: &str) {
        let stamped = format!("{} {}", Local::now().format("%H:%M:%S %d-%m-%Y"), text);
        self.notify(&stamped).await;
    }
}

//! Bot runner: the control loop and the operator command listener.
//!
//! The loop owns the engine and drives one tick per interval. The listener
//! runs on its own task and talks to the loop only through the shared enable
//! flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Local;
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};

use crate::api::{Command, ExchangeGateway, TelegramClient, Update};
use crate::trading::Engine;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Delay between control-loop ticks (seconds)
    pub tick_interval_secs: u64,

    /// Start with trading enabled instead of waiting for the operator
    pub start_enabled: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 3,
            start_enabled: false,
        }
    }
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    engine: Engine,
    enabled: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    pub fn new(config: BotConfig, engine: Engine) -> Self {
        let enabled = Arc::new(AtomicBool::new(config.start_enabled));
        Self {
            config,
            engine,
            enabled,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag written by the command listener.
    pub fn enabled_flag(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Main run loop. Returns after Ctrl+C once the position is closed.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            symbol = %self.engine.config().symbol,
            tick_secs = self.config.tick_interval_secs,
            "Starting control loop"
        );

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        let mut ticker = interval(Duration::from_secs(self.config.tick_interval_secs.max(1)));

        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.step().await;
        }

        self.shutdown().await;
        Ok(())
    }

    /// One loop iteration with the current flag value.
    async fn step(&mut self) {
        let enabled = self.enabled.load(Ordering::SeqCst);
        self.engine.run(enabled).await;
    }

    async fn shutdown(&mut self) {
        if !self.engine.state().in_position() {
            info!("Shutdown complete, no open position");
            return;
        }

        match self.engine.flatten().await {
            Ok(()) => info!("Shutdown complete, position closed"),
            Err(e) => error!(error = %e, "Failed to close position on shutdown"),
        }
    }
}

/// Turns operator commands into flag changes and account queries.
pub struct CommandHandler {
    gateway: Arc<dyn ExchangeGateway>,
    symbol: String,
    enabled: Arc<AtomicBool>,
}

impl CommandHandler {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, symbol: String, enabled: Arc<AtomicBool>) -> Self {
        Self {
            gateway,
            symbol,
            enabled,
        }
    }

    /// Apply `command` and build the reply text.
    pub async fn handle(&self, command: Command) -> String {
        match command {
            Command::Menu => "Choose an action".to_string(),
            Command::StartTrading => {
                self.enabled.store(true, Ordering::SeqCst);
                info!("Trading enabled by operator");
                format!("{} [BOT ACTIVE] Awaiting signals...", Local::now().format("%H:%M:%S %d-%m-%Y"))
            }
            Command::StopTrading => {
                self.enabled.store(false, Ordering::SeqCst);
                info!("Trading disabled by operator");
                "Stop_trading".to_string()
            }
            Command::Balance => match self.gateway.get_balance().await {
                Ok(balance) => format!("Balance: {:.2} USDT", balance),
                Err(e) => {
                    warn!(error = %e, "Balance query failed");
                    format!("Balance error: {}", e)
                }
            },
            Command::Pnl => match self.gateway.get_unrealized_pnl(&self.symbol).await {
                Ok(pnl) => format!("PnL: {}", pnl),
                Err(e) => {
                    warn!(error = %e, "PnL query failed");
                    format!("PnL error: {}", e)
                }
            },
        }
    }
}

/// Long-polls Telegram and answers commands from the operator chat.
pub struct CommandListener {
    telegram: Arc<TelegramClient>,
    handler: CommandHandler,
}

impl CommandListener {
    pub fn new(telegram: Arc<TelegramClient>, handler: CommandHandler) -> Self {
        Self { telegram, handler }
    }

    /// Poll until `shutdown` is set. Transient errors back off and retry.
    pub async fn run(self, shutdown: Arc<AtomicBool>) {
        let mut offset = 0;
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: None,
            max_interval: Duration::from_secs(60),
            ..Default::default()
        };

        info!(chat_id = self.telegram.chat_id(), "Command listener started");

        while !shutdown.load(Ordering::SeqCst) {
            match self.telegram.get_updates(offset).await {
                Ok(updates) => {
                    backoff.reset();
                    for update in updates {
                        offset = update.update_id + 1;
                        self.dispatch(update).await;
                    }
                }
                Err(e) => {
                    let wait = backoff.next_backoff().unwrap_or(backoff.max_interval);
                    warn!(error = %e, wait_ms = wait.as_millis() as u64, "Telegram polling failed, retrying");
                    sleep(wait).await;
                }
            }
        }
    }

    async fn dispatch(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };

        if message.chat.id != self.telegram.chat_id() {
            debug!(chat_id = message.chat.id, "Ignoring message from unknown chat");
            return;
        }

        let Some(command) = message.text.as_deref().and_then(Command::parse) else {
            return;
        };

        let reply = self.handler.handle(command).await;
        if let Err(e) = self.telegram.send_message(&reply).await {
            warn!(error = %e, "Failed to answer operator command");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api::{LogNotifier, MarketData, PaperConfig, PaperExchange};
    use crate::models::{Candle, OrderSide, SymbolSpec};
    use crate::trading::StrategyConfig;

    #[derive(Default)]
    struct FakeMarket {
        last: Option<Decimal>,
        candle_requests: AtomicUsize,
    }

    #[async_trait]
    impl MarketData for FakeMarket {
        async fn fetch_candles(&self, _symbol: &str, _interval: &str, _limit: usize) -> Result<Vec<Candle>> {
            self.candle_requests.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn get_last_price(&self, _symbol: &str) -> Result<Decimal> {
            self.last.ok_or_else(|| anyhow::anyhow!("ticker unavailable"))
        }

        async fn get_best_bid_ask(&self, _symbol: &str) -> Result<(Decimal, Decimal)> {
            let last = self.get_last_price("").await?;
            Ok((last, last))
        }

        async fn get_symbol_spec(&self, _symbol: &str) -> Result<SymbolSpec> {
            Ok(SymbolSpec {
                min_qty: dec!(0.001),
                qty_step: dec!(0.001),
                tick_size: dec!(0.1),
            })
        }
    }

    fn paper(last: Option<Decimal>) -> (Arc<FakeMarket>, Arc<PaperExchange>) {
        let market = Arc::new(FakeMarket {
            last,
            ..Default::default()
        });
        let exchange = PaperExchange::new(
            market.clone(),
            PaperConfig {
                initial_balance: dec!(1000),
                fee_rate: Decimal::ZERO,
                slippage: Decimal::ZERO,
            },
        );
        (market, Arc::new(exchange))
    }

    fn command_handler(gateway: Arc<PaperExchange>) -> (CommandHandler, Arc<AtomicBool>) {
        let enabled = Arc::new(AtomicBool::new(false));
        let handler = CommandHandler::new(gateway, "BTCUSDT".to_string(), enabled.clone());
        (handler, enabled)
    }

    #[tokio::test]
    async fn test_start_and_stop_toggle_flag() {
        let (_, gateway) = paper(Some(dec!(100)));
        let (handler, enabled) = command_handler(gateway);

        let reply = handler.handle(Command::StartTrading).await;
        assert!(reply.ends_with("[BOT ACTIVE] Awaiting signals..."));
        assert!(enabled.load(Ordering::SeqCst));

        assert_eq!(handler.handle(Command::StopTrading).await, "Stop_trading");
        assert!(!enabled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_balance_reply() {
        let (_, gateway) = paper(Some(dec!(100)));
        let (handler, _) = command_handler(gateway);

        assert_eq!(handler.handle(Command::Balance).await, "Balance: 1000.00 USDT");
    }

    #[tokio::test]
    async fn test_pnl_reply_and_error() {
        let (_, gateway) = paper(Some(dec!(100)));
        gateway.place_market(OrderSide::Buy, dec!(1), "BTCUSDT").await.unwrap();
        let (handler, _) = command_handler(gateway);
        assert_eq!(handler.handle(Command::Pnl).await, "PnL: 0");

        let (_, gateway) = paper(None);
        let (handler, _) = command_handler(gateway);
        let reply = handler.handle(Command::Pnl).await;
        assert!(reply.starts_with("PnL error:"));
        assert!(reply.contains("ticker unavailable"));
    }

    #[tokio::test]
    async fn test_step_follows_enable_flag() {
        let (market, gateway) = paper(Some(dec!(100)));
        let engine = Engine::new(StrategyConfig::default(), gateway, Arc::new(LogNotifier));
        let mut bot = Bot::new(BotConfig::default(), engine);

        bot.step().await;
        assert_eq!(market.candle_requests.load(Ordering::SeqCst), 0);

        bot.enabled_flag().store(true, Ordering::SeqCst);
        bot.step().await;
        assert_eq!(market.candle_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_returns_when_shutdown_is_set() {
        let (_, gateway) = paper(Some(dec!(100)));
        let engine = Engine::new(StrategyConfig::default(), gateway, Arc::new(LogNotifier));
        let mut bot = Bot::new(BotConfig::default(), engine);

        bot.shutdown_signal().store(true, Ordering::SeqCst);
        tokio_test::assert_ok!(bot.run().await);
    }

    #[tokio::test]
    async fn test_dispatch_ignores_other_chats() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_string_contains("Balance: 1000.00 USDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {"message_id": 1}})))
            .expect(1)
            .mount(&server)
            .await;

        let telegram = Arc::new(TelegramClient::with_base_url("TOKEN".to_string(), 42, server.uri()).unwrap());
        let (_, gateway) = paper(Some(dec!(100)));
        let (handler, _) = command_handler(gateway);
        let listener = CommandListener::new(telegram, handler);

        let update = |chat: i64| -> Update {
            serde_json::from_value(json!({
                "update_id": 1,
                "message": {"message_id": 1, "chat": {"id": chat}, "text": "Balance"}
            }))
            .unwrap()
        };

        listener.dispatch(update(7)).await;
        listener.dispatch(update(42)).await;
    }
}

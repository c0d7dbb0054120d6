//! EMA Pullback Futures Bot
//!
//! Trades USDT perpetuals on Bybit: enters on pullbacks to the fast EMA in
//! the direction of the EMA trend, averages down on a doubling DCA grid and
//! exits at take-profit or breakeven after a trend flip. Operated from
//! Telegram.

mod api;
mod bot;
mod indicators;
mod models;
mod trading;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{
    BybitClient, BybitConfig, Environment, ExchangeGateway, LogNotifier, Notifier, PaperConfig,
    PaperExchange, TelegramClient,
};
use crate::bot::{Bot, BotConfig, CommandHandler, CommandListener};
use crate::trading::{parse_grid, Engine, StrategyConfig};

/// EMA pullback futures bot CLI.
#[derive(Parser)]
#[command(name = "emabot")]
#[command(about = "EMA pullback trading bot for Bybit USDT perpetuals", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Simulate fills locally against live prices
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    #[command(flatten)]
    strategy: StrategyArgs,

    #[command(flatten)]
    credentials: Credentials,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StrategyArgs {
    /// Traded symbol
    #[arg(long, env = "SYMBOL", default_value = "BTCUSDT")]
    symbol: String,

    /// Kline interval ("1", "5", "60", "D", ...)
    #[arg(long, env = "INTERVAL", default_value = "1")]
    interval: String,

    /// Fast EMA window
    #[arg(long, env = "EMA_FAST", default_value = "9")]
    ema_fast: usize,

    /// Slow EMA window
    #[arg(long, env = "EMA_SLOW", default_value = "21")]
    ema_slow: usize,

    /// Fraction of balance per base entry
    #[arg(long, env = "POSITION_SIZE", default_value = "0.1")]
    allocation: Decimal,

    /// Take-profit distance from average entry
    #[arg(long, env = "TAKE_PROFIT", default_value = "0.01")]
    take_profit: Decimal,

    /// Commission rate used for breakeven exits and paper fills
    #[arg(long, env = "COMMISSION_RATE", default_value = "0.001")]
    commission_rate: Decimal,

    /// Comma-separated DCA size multipliers
    #[arg(long, env = "DCA_GRID", default_value = "1,2,4")]
    dca_grid: String,

    /// Price distance of the first DCA level
    #[arg(long, env = "DCA_STEP", default_value = "50")]
    dca_step: Decimal,

    /// Never open short positions
    #[arg(long, env = "ONLY_LONG")]
    long_only: bool,

    /// Seconds before an unfilled entry order is cancelled (0 disables)
    #[arg(long, env = "ENTRY_TIMEOUT", default_value = "300")]
    entry_timeout: u64,

    /// Control loop interval in seconds
    #[arg(long, env = "TICK_SECS", default_value = "3")]
    tick_secs: u64,
}

impl StrategyArgs {
    fn to_config(&self) -> Result<StrategyConfig> {
        let config = StrategyConfig {
            symbol: self.symbol.clone(),
            interval: self.interval.clone(),
            ema_fast: self.ema_fast,
            ema_slow: self.ema_slow,
            allocation: self.allocation,
            take_profit_rate: self.take_profit,
            commission_rate: self.commission_rate,
            dca_grid: parse_grid(&self.dca_grid)?,
            dca_step: self.dca_step,
            long_only: self.long_only,
            entry_order_timeout_secs: self.entry_timeout,
            ..Default::default()
        };
        config.validate().context("Invalid strategy configuration")?;
        Ok(config)
    }
}

#[derive(Args)]
struct Credentials {
    #[arg(long, env = "BYBIT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "BYBIT_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// Use the Bybit demo trading host
    #[arg(long, env = "DEMO")]
    demo: bool,

    /// Use the Bybit testnet host
    #[arg(long, env = "TESTNET")]
    testnet: bool,

    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    telegram_token: Option<String>,

    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    telegram_chat_id: Option<i64>,
}

impl Credentials {
    fn environment(&self) -> Environment {
        if self.testnet {
            Environment::Testnet
        } else if self.demo {
            Environment::Demo
        } else {
            Environment::Mainnet
        }
    }

    fn telegram(&self) -> Result<Option<TelegramClient>> {
        match (&self.telegram_token, self.telegram_chat_id) {
            (Some(token), Some(chat_id)) => Ok(Some(TelegramClient::new(token.clone(), chat_id)?)),
            _ => Ok(None),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading loop and the Telegram command listener
    Run {
        /// Trade immediately instead of waiting for Start_trading
        #[arg(long)]
        enabled: bool,

        /// Starting balance for --dry-run
        #[arg(long, default_value = "10000")]
        paper_balance: Decimal,
    },

    /// Show effective configuration
    Config,

    /// Show account equity
    Balance,

    /// Show unrealized PnL for the configured symbol
    Pnl,

    /// Show the latest closed bars and whether an entry condition holds
    Signal,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.strategy.to_config()?;

    match cli.command {
        Commands::Run {
            enabled,
            paper_balance,
        } => {
            let gateway = build_gateway(&cli.credentials, cli.dry_run, &config, paper_balance)?;
            let telegram = cli.credentials.telegram()?.map(Arc::new);

            let notifier: Arc<dyn Notifier> = match &telegram {
                Some(client) => client.clone() as Arc<dyn Notifier>,
                None => {
                    warn!("TELEGRAM_TOKEN / TELEGRAM_CHAT_ID not set, notifications go to the log only");
                    Arc::new(LogNotifier)
                }
            };

            let bot_config = BotConfig {
                tick_interval_secs: cli.strategy.tick_secs,
                // No command channel, so trade from the start
                start_enabled: enabled || telegram.is_none(),
            };

            let engine = Engine::new(config.clone(), gateway.clone(), notifier);
            let mut bot = Bot::new(bot_config, engine);

            if let Some(client) = telegram {
                let handler = CommandHandler::new(gateway, config.symbol.clone(), bot.enabled_flag());
                let listener = CommandListener::new(client, handler);
                tokio::spawn(listener.run(bot.shutdown_signal()));
            }

            println!("\n=== EMA Pullback Bot ===");
            println!("Symbol:    {}", config.symbol);
            println!("Interval:  {}", config.interval);
            println!("Mode:      {}", if cli.dry_run { "PAPER" } else { "LIVE" });
            println!("\nPress Ctrl+C to stop\n");

            bot.run().await?;
        }

        Commands::Config => {
            println!("\n=== Strategy Configuration ===");
            println!("Symbol:             {}", config.symbol);
            println!("Interval:           {}", config.interval);
            println!("EMA fast / slow:    {} / {}", config.ema_fast, config.ema_slow);
            println!("Candles per tick:   {}", config.candle_limit());
            println!("Allocation:         {}%", config.allocation * Decimal::ONE_HUNDRED);
            println!("Take profit:        {}%", config.take_profit_rate * Decimal::ONE_HUNDRED);
            println!("Commission:         {}%", config.commission_rate * Decimal::ONE_HUNDRED);
            println!(
                "DCA grid:           {}",
                config
                    .dca_grid
                    .iter()
                    .map(|m| format!("x{}", m))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!("DCA step:           {}", config.dca_step);
            println!("Long only:          {}", config.long_only);
            println!("Entry timeout:      {}s", config.entry_order_timeout_secs);
            println!("Tick interval:      {}s", cli.strategy.tick_secs);

            println!("\n=== Connectivity ===");
            println!("Bybit host:         {}", cli.credentials.environment().base_url());
            println!("API key set:        {}", cli.credentials.api_key.is_some());
            println!(
                "Telegram enabled:   {}",
                cli.credentials.telegram_token.is_some() && cli.credentials.telegram_chat_id.is_some()
            );
            println!("Dry run:            {}", cli.dry_run);
        }

        Commands::Balance => {
            let client = bybit_client(&cli.credentials)?;
            let balance = client.get_balance().await?;
            println!("Balance: {:.2} USDT", balance);
        }

        Commands::Pnl => {
            let client = bybit_client(&cli.credentials)?;
            let pnl = client.get_unrealized_pnl(&config.symbol).await?;
            println!("PnL ({}): {}", config.symbol, pnl);
        }

        Commands::Signal => {
            let client: Arc<dyn ExchangeGateway> = Arc::new(bybit_client(&cli.credentials)?);
            let engine = Engine::new(config.clone(), client, Arc::new(LogNotifier));
            let report = engine.latest_signal().await?;

            println!(
                "\n{:<22} {:>14} {:>14} {:>14}",
                "BAR", "CLOSE", "EMA FAST", "EMA SLOW"
            );
            println!("{}", "-".repeat(66));
            for (label, bar) in [("previous", &report.previous), ("closed", &report.closed)] {
                println!(
                    "{:<22} {:>14} {:>14.2} {:>14.2}",
                    format!("{} {}", label, bar.open_time.format("%H:%M")),
                    bar.close,
                    bar.ema_fast,
                    bar.ema_slow
                );
            }

            println!("\nTrend: {}", report.trend);
            match report.entry {
                Some(side) => println!("Entry: {} pullback signal", side),
                None => println!("Entry: none"),
            }
        }
    }

    Ok(())
}

fn bybit_client(credentials: &Credentials) -> Result<BybitClient> {
    BybitClient::new(BybitConfig {
        api_key: credentials.api_key.clone(),
        api_secret: credentials.api_secret.clone(),
        environment: credentials.environment(),
        ..Default::default()
    })
}

/// Live Bybit gateway, or a paper exchange on top of Bybit market data.
fn build_gateway(
    credentials: &Credentials,
    dry_run: bool,
    config: &StrategyConfig,
    paper_balance: Decimal,
) -> Result<Arc<dyn ExchangeGateway>> {
    let client = Arc::new(bybit_client(credentials)?);

    if dry_run {
        info!(balance = %paper_balance, "Paper trading enabled");
        let paper = PaperExchange::new(
            client,
            PaperConfig {
                initial_balance: paper_balance,
                fee_rate: config.commission_rate,
                ..Default::default()
            },
        );
        return Ok(Arc::new(paper));
    }

    if credentials.api_key.is_none() || credentials.api_secret.is_none() {
        bail!("BYBIT_API_KEY and BYBIT_API_SECRET are required unless --dry-run is set");
    }

    Ok(client as Arc<dyn ExchangeGateway>)
}

//! Exchange and messaging clients.

mod bybit_client;
mod gateway;
mod paper;
mod telegram;
mod types;

pub use bybit_client::{BybitClient, BybitConfig, Environment};
pub use gateway::{ExchangeGateway, Notifier};
#[cfg(test)]
pub use gateway::MarketData;
pub use paper::{PaperConfig, PaperExchange};
pub use telegram::{Command, LogNotifier, TelegramClient};
pub use types::Update;

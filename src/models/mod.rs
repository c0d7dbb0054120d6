//! Data models for candles, instruments, orders and positions.

mod candle;
mod market;
mod position;
mod trade;

pub use candle::{Candle, IndicatorBar};
pub use market::{SymbolSpec, Trend};
pub use position::{ExchangePosition, NetPosition, PositionSide};
pub use trade::OrderSide;

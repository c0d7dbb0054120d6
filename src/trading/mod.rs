//! Trading logic: configuration, sizing, entry/exit rules, DCA grid and the
//! position lifecycle engine.

mod config;
mod dca;
mod engine;
mod position_sizer;
mod shadow;
mod strategy;

pub use config::{parse_grid, StrategyConfig};
pub use engine::Engine;

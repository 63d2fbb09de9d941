// Core modules
pub mod backtest;
pub mod collector;
pub mod config;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod ledger;
pub mod live;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use error::TradingError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, TradingError>;

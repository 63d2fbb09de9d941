// Historical replay of the signal pipeline
pub mod metrics;
pub mod service;
pub mod simulator;
pub mod synthetic;

pub use metrics::BacktestMetrics;
pub use service::{BacktestRequest, BacktestService};
pub use simulator::{
    run_backtest, BacktestConfig, BacktestResult, BacktestTrade, EquityPoint, ExitReason,
};
pub use synthetic::{MarketScenario, SyntheticDataGenerator};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metrics::BacktestMetrics;
use crate::error::TradingError;
use crate::models::Candle;
use crate::strategy::{Direction, Strategy};
use crate::Result;

/// Fill model parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Charged on the notional of each leg
    pub fee_rate: f64,
    /// Entries fill this fraction above the close, exits below
    pub slippage: f64,
    pub min_candles: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1_000_000.0,
            fee_rate: 0.001,
            slippage: 0.0005,
            min_candles: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    EndOfData,
}

/// One completed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestTrade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    /// Net of both fees
    pub pnl: f64,
    pub pnl_percent: f64,
    pub fees: f64,
    pub exit_reason: ExitReason,
}

impl BacktestTrade {
    pub fn holding_minutes(&self) -> i64 {
        (self.exit_time - self.entry_time).num_minutes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub strategy: String,
    pub candles: usize,
    pub signals: usize,
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: BacktestMetrics,
}

struct OpenTrade {
    entry_time: DateTime<Utc>,
    entry_price: f64,
    size: f64,
}

impl OpenTrade {
    fn close(self, candle: &Candle, config: &BacktestConfig, reason: ExitReason) -> BacktestTrade {
        let exit_price = candle.close * (1.0 - config.slippage);
        let cost = self.entry_price * self.size;
        let fees = cost * config.fee_rate + exit_price * self.size * config.fee_rate;
        let pnl = (exit_price - self.entry_price) * self.size - fees;

        BacktestTrade {
            entry_time: self.entry_time,
            exit_time: candle.timestamp,
            entry_price: self.entry_price,
            exit_price,
            size: self.size,
            pnl,
            pnl_percent: if cost > 0.0 { pnl / cost * 100.0 } else { 0.0 },
            fees,
            exit_reason: reason,
        }
    }
}

/// Replay a strategy over historical candles.
///
/// Long only, one position at a time: a buy opens with the full initial
/// capital, a sell closes everything. Whatever is still open on the last
/// candle is closed at its close.
pub fn run_backtest(
    strategy: &dyn Strategy,
    candles: &[Candle],
    config: &BacktestConfig,
) -> Result<BacktestResult> {
    if candles.len() < config.min_candles {
        return Err(TradingError::InsufficientData {
            required: config.min_candles,
            available: candles.len(),
        });
    }

    let series = strategy.signal_series(candles);
    let offset = candles.len() - series.len();

    let mut trades = Vec::new();
    let mut equity = config.initial_capital;
    let mut equity_curve = vec![EquityPoint {
        timestamp: candles[0].timestamp,
        equity,
    }];
    let mut open: Option<OpenTrade> = None;
    let mut signals = 0;

    for (point, candle) in series.iter().zip(&candles[offset..]) {
        if point.direction != Direction::Hold {
            signals += 1;
        }

        match (point.direction, open.take()) {
            (Direction::Buy, None) => {
                let entry_price = candle.close * (1.0 + config.slippage);
                open = Some(OpenTrade {
                    entry_time: candle.timestamp,
                    entry_price,
                    size: config.initial_capital / entry_price,
                });
            }
            (Direction::Sell, Some(position)) => {
                let trade = position.close(candle, config, ExitReason::Signal);
                equity += trade.pnl;
                equity_curve.push(EquityPoint {
                    timestamp: trade.exit_time,
                    equity,
                });
                trades.push(trade);
            }
            (_, still_open) => open = still_open,
        }
    }

    if let (Some(position), Some(last)) = (open, candles.last()) {
        let trade = position.close(last, config, ExitReason::EndOfData);
        equity += trade.pnl;
        equity_curve.push(EquityPoint {
            timestamp: trade.exit_time,
            equity,
        });
        trades.push(trade);
    }

    let metrics = BacktestMetrics::from_trades(&trades, config.initial_capital);

    tracing::info!(
        strategy = strategy.name(),
        candles = candles.len(),
        signals,
        trades = trades.len(),
        return_pct = metrics.total_return_percent,
        "📊 Backtest finished"
    );

    Ok(BacktestResult {
        strategy: strategy.name().to_string(),
        candles: candles.len(),
        signals,
        trades,
        equity_curve,
        metrics,
    })
}

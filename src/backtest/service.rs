use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::simulator::{run_backtest, BacktestConfig, BacktestResult};
use crate::models::{MarketKey, Timeframe};
use crate::persistence::CandleStore;
use crate::strategy::StrategyConfig;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub strategy: StrategyConfig,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Overrides the configured starting capital
    pub initial_capital: Option<f64>,
}

/// Runs backtests over stored candles
pub struct BacktestService {
    candles: Arc<dyn CandleStore>,
    exchange_id: String,
    defaults: BacktestConfig,
}

impl BacktestService {
    pub fn new(candles: Arc<dyn CandleStore>, exchange_id: impl Into<String>, defaults: BacktestConfig) -> Self {
        Self {
            candles,
            exchange_id: exchange_id.into(),
            defaults,
        }
    }

    pub async fn run(&self, request: &BacktestRequest) -> Result<BacktestResult> {
        let key = MarketKey::new(&self.exchange_id, &request.symbol, request.timeframe);
        let candles = self.candles.find_candles(&key, request.from, request.to).await?;

        tracing::info!(
            market = %key,
            strategy = %request.strategy.kind(),
            candles = candles.len(),
            from = %request.from,
            to = %request.to,
            "Running backtest"
        );

        let config = BacktestConfig {
            initial_capital: request.initial_capital.unwrap_or(self.defaults.initial_capital),
            ..self.defaults.clone()
        };

        run_backtest(request.strategy.as_strategy(), &candles, &config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{MarketScenario, SyntheticDataGenerator};
    use crate::error::TradingError;
    use crate::persistence::MemoryStore;
    use crate::strategy::RsiStrategy;
    use chrono::Duration;

    #[tokio::test]
    async fn test_runs_over_stored_window() {
        let store = Arc::new(MemoryStore::new());
        let candles = SyntheticDataGenerator::new(11).generate(MarketScenario::Sideways, 200, Timeframe::H1);
        let key = MarketKey::new("bithumb", "BTC/KRW", Timeframe::H1);
        store.upsert_candles(&key, &candles).await.unwrap();

        let service = BacktestService::new(store, "bithumb", BacktestConfig::default());
        let request = BacktestRequest {
            symbol: "BTC/KRW".to_string(),
            timeframe: Timeframe::H1,
            strategy: StrategyConfig::Rsi(RsiStrategy::default()),
            from: candles[0].timestamp,
            to: candles[149].timestamp,
            initial_capital: Some(5_000_000.0),
        };

        let result = service.run(&request).await.unwrap();
        assert_eq!(result.candles, 150);
        assert_eq!(result.metrics.start_capital, 5_000_000.0);
        assert_eq!(result.equity_curve[0].timestamp, candles[0].timestamp);
    }

    #[tokio::test]
    async fn test_short_window_is_insufficient() {
        let store = Arc::new(MemoryStore::new());
        let service = BacktestService::new(store, "bithumb", BacktestConfig::default());
        let now = Utc::now();
        let request = BacktestRequest {
            symbol: "BTC/KRW".to_string(),
            timeframe: Timeframe::H1,
            strategy: StrategyConfig::Rsi(RsiStrategy::default()),
            from: now - Duration::days(1),
            to: now,
            initial_capital: None,
        };

        let err = service.run(&request).await.unwrap_err();
        assert!(matches!(err, TradingError::InsufficientData { available: 0, .. }));
    }
}

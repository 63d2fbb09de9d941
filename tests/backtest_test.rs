use quantdesk::backtest::{
    run_backtest, BacktestConfig, BacktestRequest, BacktestService, ExitReason, MarketScenario,
    SyntheticDataGenerator,
};
use quantdesk::persistence::{CandleStore, MemoryStore};
use quantdesk::strategy::{
    BollingerStrategy, Direction, MaCrossoverStrategy, MacdStrategy, RsiStrategy, Strategy,
    StrategyConfig,
};
use quantdesk::{MarketKey, Timeframe, TradingError};
use std::sync::Arc;

fn dip_and_recovery() -> Vec<quantdesk::Candle> {
    SyntheticDataGenerator::new(42).generate(
        MarketScenario::DipAndRecovery {
            dip_start: 20,
            dip_bottom: 35,
            recovered: 50,
        },
        150,
        Timeframe::H1,
    )
}

#[test]
fn test_rsi_buys_the_dip() {
    let _ = tracing_subscriber::fmt::try_init();
    let candles = dip_and_recovery();
    let strategy = RsiStrategy::default();

    let series = strategy.signal_series(&candles);
    let offset = candles.len() - series.len();
    let buys: Vec<usize> = series
        .iter()
        .enumerate()
        .filter(|(_, p)| p.direction == Direction::Buy)
        .map(|(i, _)| i + offset)
        .collect();
    assert!(
        buys.iter().any(|i| (35..50).contains(i)),
        "no buy during the recovery: {:?}",
        buys
    );

    let result = run_backtest(&strategy, &candles, &BacktestConfig::default()).unwrap();
    println!(
        "rsi: {} signals, {} trades, return {:.2}%",
        result.signals,
        result.trades.len(),
        result.metrics.total_return_percent
    );

    assert!(result.signals >= 1);
    assert!(!result.trades.is_empty());
    assert_eq!(result.metrics.start_capital, 1_000_000.0);
    assert_eq!(result.metrics.total_trades, result.trades.len());
    // break-even trades count as neither
    assert!(result.metrics.winning_trades + result.metrics.losing_trades <= result.metrics.total_trades);
    // the equity curve moves only when a trade closes
    assert_eq!(result.equity_curve.len(), result.trades.len() + 1);
}

#[test]
fn test_trades_do_not_overlap() {
    let candles = SyntheticDataGenerator::new(9).generate(MarketScenario::Sideways, 400, Timeframe::M15);

    for config in [
        StrategyConfig::Rsi(RsiStrategy::default()),
        StrategyConfig::Macd(MacdStrategy::default()),
        StrategyConfig::MaCrossover(MaCrossoverStrategy::default()),
        StrategyConfig::Bollinger(BollingerStrategy::default()),
    ] {
        let result = run_backtest(config.as_strategy(), &candles, &BacktestConfig::default()).unwrap();

        for pair in result.trades.windows(2) {
            assert!(pair[0].exit_time <= pair[1].entry_time, "{} overlaps", config.kind());
        }
        for trade in &result.trades {
            assert!(trade.exit_time >= trade.entry_time);
            assert!(trade.fees > 0.0);
        }
        if let Some(last) = result.trades.last() {
            if last.exit_reason == ExitReason::EndOfData {
                assert_eq!(last.exit_time, candles.last().unwrap().timestamp);
            }
        }

        let expected_end = 1_000_000.0 + result.trades.iter().map(|t| t.pnl).sum::<f64>();
        assert!((result.metrics.end_capital - expected_end).abs() < 1e-6);
    }
}

#[test]
fn test_backtest_is_deterministic() {
    let candles = dip_and_recovery();
    let strategy = MacdStrategy::default();

    let a = run_backtest(&strategy, &candles, &BacktestConfig::default()).unwrap();
    let b = run_backtest(&strategy, &candles, &BacktestConfig::default()).unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_service_reads_stored_candles() {
    let store = Arc::new(MemoryStore::new());
    let candles = dip_and_recovery();
    let key = MarketKey::new("bithumb", "BTC/KRW", Timeframe::H1);
    store.upsert_candles(&key, &candles).await.unwrap();

    let service = BacktestService::new(store, "bithumb", BacktestConfig::default());
    let mut request = BacktestRequest {
        symbol: "BTC/KRW".to_string(),
        timeframe: Timeframe::H1,
        strategy: StrategyConfig::from_parts("rsi", &serde_json::json!({ "oversold": 25.0 })).unwrap(),
        from: candles[0].timestamp,
        to: candles[149].timestamp,
        initial_capital: None,
    };

    let result = service.run(&request).await.unwrap();
    assert_eq!(result.candles, 150);
    assert_eq!(result.strategy, "rsi");

    request.to = candles[60].timestamp;
    let err = service.run(&request).await.unwrap_err();
    assert!(matches!(
        err,
        TradingError::InsufficientData {
            required: 100,
            available: 61
        }
    ));
}

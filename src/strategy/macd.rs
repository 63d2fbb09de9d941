use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::signals::zero_cross;
use super::{build_signals, series_points, Direction, Signal, SignalPoint, Strategy};
use crate::indicators::calculate_macd;
use crate::models::Candle;

/// MACD histogram sign changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MacdStrategy {
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
}

impl Default for MacdStrategy {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

impl Strategy for MacdStrategy {
    fn name(&self) -> &'static str {
        "macd"
    }

    fn min_candles_required(&self) -> usize {
        self.slow_period + self.signal_period
    }

    fn signal_series(&self, candles: &[Candle]) -> Vec<SignalPoint> {
        let histogram: Vec<f64> = calculate_macd(
            candles,
            self.fast_period,
            self.slow_period,
            self.signal_period,
        )
        .iter()
        .map(|p| p.histogram)
        .collect();
        series_points(candles, &zero_cross(&histogram))
    }

    fn generate_signals(&self, symbol: &str, candles: &[Candle]) -> Vec<Signal> {
        let macd = calculate_macd(
            candles,
            self.fast_period,
            self.slow_period,
            self.signal_period,
        );
        let histogram: Vec<f64> = macd.iter().map(|p| p.histogram).collect();
        let directions = zero_cross(&histogram);

        build_signals(symbol, candles, &directions, |i, direction| {
            let point = &macd[i];
            let reason = match direction {
                Direction::Buy => format!(
                    "MACD crossed above signal line (histogram: {:.2})",
                    point.histogram
                ),
                _ => format!(
                    "MACD crossed below signal line (histogram: {:.2})",
                    point.histogram
                ),
            };
            let indicators = BTreeMap::from([
                ("macd".to_string(), point.macd),
                ("signal".to_string(), point.signal),
                ("histogram".to_string(), point.histogram),
            ]);
            ((point.histogram.abs() * 10.0).min(100.0), reason, indicators)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_candles;

    #[test]
    fn test_macd_signals_alternate_on_oscillation() {
        let prices: Vec<f64> = (0..200)
            .map(|i| 1000.0 + (i as f64 / 8.0).sin() * 100.0)
            .collect();
        let candles = test_candles(&prices);
        let signals = MacdStrategy::default().generate_signals("ETH/KRW", &candles);

        assert!(signals.len() >= 2);
        for pair in signals.windows(2) {
            assert_ne!(pair[0].direction, pair[1].direction);
        }
        for s in &signals {
            assert!((0.0..=100.0).contains(&s.strength));
            assert!(s.indicators.contains_key("histogram"));
        }
    }

    #[test]
    fn test_flat_market_is_quiet() {
        let candles = test_candles(&[100.0; 100]);
        let series = MacdStrategy::default().signal_series(&candles);
        assert!(!series.is_empty());
        assert!(series.iter().all(|p| p.direction == Direction::Hold));
    }
}

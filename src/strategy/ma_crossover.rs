use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::signals::line_cross;
use super::{build_signals, series_points, Direction, Signal, SignalPoint, Strategy};
use crate::indicators::{ema_values, sma_values};
use crate::models::{closes, Candle};

/// Golden cross / dead cross between a short and a long moving average
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaCrossoverStrategy {
    pub short_period: usize,
    pub long_period: usize,
    #[serde(rename = "useEMA", alias = "useEma")]
    pub use_ema: bool,
}

impl Default for MaCrossoverStrategy {
    fn default() -> Self {
        Self {
            short_period: 9,
            long_period: 21,
            use_ema: false,
        }
    }
}

impl MaCrossoverStrategy {
    /// Short and long averages trimmed to their common timestamps
    fn aligned(&self, candles: &[Candle]) -> (Vec<f64>, Vec<f64>) {
        let prices = closes(candles);
        let average = |period| {
            if self.use_ema {
                ema_values(&prices, period)
            } else {
                sma_values(&prices, period)
            }
        };
        let short = average(self.short_period);
        let long = average(self.long_period);

        let common = short.len().min(long.len());
        (
            short[short.len() - common..].to_vec(),
            long[long.len() - common..].to_vec(),
        )
    }
}

impl Strategy for MaCrossoverStrategy {
    fn name(&self) -> &'static str {
        "ma_crossover"
    }

    fn min_candles_required(&self) -> usize {
        self.short_period.max(self.long_period) + 1
    }

    fn signal_series(&self, candles: &[Candle]) -> Vec<SignalPoint> {
        let (short, long) = self.aligned(candles);
        series_points(candles, &line_cross(&short, &long))
    }

    fn generate_signals(&self, symbol: &str, candles: &[Candle]) -> Vec<Signal> {
        let (short, long) = self.aligned(candles);
        let directions = line_cross(&short, &long);

        build_signals(symbol, candles, &directions, |i, direction| {
            let (s, l) = (short[i], long[i]);
            let reason = match direction {
                Direction::Buy => format!(
                    "Golden Cross: {}MA crossed above {}MA",
                    self.short_period, self.long_period
                ),
                _ => format!(
                    "Dead Cross: {}MA crossed below {}MA",
                    self.short_period, self.long_period
                ),
            };
            let strength = if l == 0.0 {
                0.0
            } else {
                ((s - l).abs() / l * 1000.0).min(100.0)
            };
            let indicators = BTreeMap::from([
                ("shortMA".to_string(), s),
                ("longMA".to_string(), l),
            ]);
            (strength, reason, indicators)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_candles;

    fn v_shape() -> Vec<f64> {
        let mut prices: Vec<f64> = (0..30).map(|i| 200.0 - i as f64 * 2.0).collect();
        prices.extend((0..30).map(|i| 142.0 + i as f64 * 3.0));
        prices
    }

    #[test]
    fn test_golden_cross_on_recovery() {
        let candles = test_candles(&v_shape());
        let signals = MaCrossoverStrategy::default().generate_signals("XRP/KRW", &candles);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].direction, Direction::Buy);
        assert!(signals[0].reason.starts_with("Golden Cross"));
        assert!(signals[0].indicators["shortMA"] > signals[0].indicators["longMA"]);
    }

    #[test]
    fn test_ema_variant_also_crosses() {
        let strategy = MaCrossoverStrategy {
            use_ema: true,
            ..Default::default()
        };
        let candles = test_candles(&v_shape());
        let signals = strategy.generate_signals("XRP/KRW", &candles);
        assert!(signals.iter().any(|s| s.direction == Direction::Buy));
    }

    #[test]
    fn test_series_aligned_to_long_average() {
        let candles = test_candles(&v_shape());
        let series = MaCrossoverStrategy::default().signal_series(&candles);
        assert_eq!(series.len(), candles.len() - 20);
        assert_eq!(series[0].timestamp, candles[20].timestamp);
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::signals::threshold_cross;
use super::{build_signals, series_points, Direction, Signal, SignalPoint, Strategy};
use crate::indicators::rsi_values;
use crate::models::{closes, Candle};

/// RSI mean reversion: buy leaving oversold, sell leaving overbought
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RsiStrategy {
    #[serde(alias = "period")]
    pub rsi_period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            overbought: 70.0,
            oversold: 30.0,
        }
    }
}

impl RsiStrategy {
    fn directions(&self, rsi: &[f64]) -> Vec<Direction> {
        threshold_cross(rsi, self.overbought, self.oversold)
    }
}

impl Strategy for RsiStrategy {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn min_candles_required(&self) -> usize {
        self.rsi_period + 2
    }

    fn signal_series(&self, candles: &[Candle]) -> Vec<SignalPoint> {
        let rsi = rsi_values(&closes(candles), self.rsi_period);
        series_points(candles, &self.directions(&rsi))
    }

    fn generate_signals(&self, symbol: &str, candles: &[Candle]) -> Vec<Signal> {
        let rsi = rsi_values(&closes(candles), self.rsi_period);
        let directions = self.directions(&rsi);

        build_signals(symbol, candles, &directions, |i, direction| {
            let value = rsi[i];
            let reason = match direction {
                Direction::Buy => format!(
                    "RSI {:.1} crossed above {} (oversold)",
                    value, self.oversold
                ),
                _ => format!(
                    "RSI {:.1} crossed below {} (overbought)",
                    value, self.overbought
                ),
            };
            let indicators = BTreeMap::from([("rsi".to_string(), value)]);
            ((50.0 - value).abs() * 2.0, reason, indicators)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_candles;

    fn dip_and_recover() -> Vec<f64> {
        let mut prices = vec![100.0; 20];
        for i in 0..15 {
            prices.push(100.0 - 2.0 * (i + 1) as f64);
        }
        for i in 0..20 {
            prices.push(70.0 + 2.0 * (i + 1) as f64);
        }
        prices
    }

    #[test]
    fn test_buy_after_oversold_recovery() {
        let strategy = RsiStrategy::default();
        let candles = test_candles(&dip_and_recover());
        let signals = strategy.generate_signals("BTC/KRW", &candles);

        let buy = signals
            .iter()
            .find(|s| s.direction == Direction::Buy)
            .expect("expected a buy signal");
        assert!(buy.reason.contains("oversold"));
        assert!(buy.indicators["rsi"] > 30.0);
        assert!((0.0..=100.0).contains(&buy.strength));
        // price is the close of the crossing candle
        let candle = candles.iter().find(|c| c.timestamp == buy.timestamp).unwrap();
        assert_eq!(buy.price, candle.close);
    }

    #[test]
    fn test_series_covers_every_rsi_point() {
        let strategy = RsiStrategy::default();
        let candles = test_candles(&dip_and_recover());
        let series = strategy.signal_series(&candles);
        assert_eq!(series.len(), candles.len() - 14);
        assert_eq!(series[0].timestamp, candles[14].timestamp);
        assert_eq!(series[0].direction, Direction::Hold);
    }

    #[test]
    fn test_no_signals_on_short_input() {
        let strategy = RsiStrategy::default();
        let candles = test_candles(&[100.0; 10]);
        assert!(strategy.generate_signals("BTC/KRW", &candles).is_empty());
        assert!(strategy.latest_signal("BTC/KRW", &candles).is_none());
    }
}

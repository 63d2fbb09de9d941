use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::signals::band_reentry;
use super::{build_signals, series_points, Direction, Signal, SignalPoint, Strategy};
use crate::indicators::{calculate_bollinger_bands, percent_b, BollingerPoint};
use crate::models::Candle;

/// Band re-entry: buy bouncing off the lower band, sell rejected at the upper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BollingerStrategy {
    pub period: usize,
    pub multiplier: f64,
}

impl Default for BollingerStrategy {
    fn default() -> Self {
        Self {
            period: 20,
            multiplier: 2.0,
        }
    }
}

impl BollingerStrategy {
    fn evaluate(&self, candles: &[Candle]) -> (Vec<BollingerPoint>, Vec<f64>, Vec<Direction>) {
        let bands = calculate_bollinger_bands(candles, self.period, self.multiplier);
        let offset = candles.len() - bands.len();
        let closes: Vec<f64> = candles[offset..].iter().map(|c| c.close).collect();
        let lower: Vec<f64> = bands.iter().map(|b| b.lower).collect();
        let upper: Vec<f64> = bands.iter().map(|b| b.upper).collect();
        let directions = band_reentry(&closes, &lower, &upper);
        (bands, closes, directions)
    }
}

impl Strategy for BollingerStrategy {
    fn name(&self) -> &'static str {
        "bollinger"
    }

    fn min_candles_required(&self) -> usize {
        self.period + 1
    }

    fn signal_series(&self, candles: &[Candle]) -> Vec<SignalPoint> {
        let (_, _, directions) = self.evaluate(candles);
        series_points(candles, &directions)
    }

    fn generate_signals(&self, symbol: &str, candles: &[Candle]) -> Vec<Signal> {
        let (bands, closes, directions) = self.evaluate(candles);

        build_signals(symbol, candles, &directions, |i, direction| {
            let band = &bands[i];
            let close = closes[i];
            let reason = match direction {
                Direction::Buy => "Price bounced from lower Bollinger Band".to_string(),
                _ => "Price rejected at upper Bollinger Band".to_string(),
            };
            let width = band.width();
            let strength = if width == 0.0 {
                0.0
            } else {
                ((close - band.middle).abs() / width * 100.0).min(100.0)
            };
            let indicators = BTreeMap::from([
                ("upper".to_string(), band.upper),
                ("middle".to_string(), band.middle),
                ("lower".to_string(), band.lower),
                ("percentB".to_string(), percent_b(close, band)),
            ]);
            (strength, reason, indicators)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_candles;

    #[test]
    fn test_bounce_from_lower_band() {
        let mut prices: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        prices.push(90.0); // breaks the lower band
        prices.push(99.0); // back inside
        let candles = test_candles(&prices);

        let signals = BollingerStrategy::default().generate_signals("BTC/KRW", &candles);
        let last = signals.last().unwrap();
        assert_eq!(last.direction, Direction::Buy);
        assert_eq!(last.timestamp, candles.last().unwrap().timestamp);
        assert!(last.indicators["percentB"] > 0.0);

        let latest = BollingerStrategy::default()
            .latest_signal("BTC/KRW", &candles)
            .unwrap();
        assert_eq!(latest, *last);
    }

    #[test]
    fn test_rejection_at_upper_band() {
        let mut prices: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        prices.push(112.0);
        prices.push(101.0);
        let candles = test_candles(&prices);

        let signal = BollingerStrategy::default()
            .latest_signal("BTC/KRW", &candles)
            .unwrap();
        assert_eq!(signal.direction, Direction::Sell);
        assert!(signal.strength >= 0.0 && signal.strength <= 100.0);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::moving_average::ema_values;
use crate::models::{closes, Candle};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdPoint {
    pub timestamp: DateTime<Utc>,
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Calculate Moving Average Convergence Divergence (MACD)
///
/// `macd = EMA(fast) - EMA(slow)`, the signal line is an EMA of the macd
/// series and `histogram = macd - signal`. Output starts once the signal
/// line is defined; fewer than `slow + signal` candles yields nothing.
///
/// # Arguments
/// * `fast` - Fast EMA period (usually 12)
/// * `slow` - Slow EMA period (usually 26), must be greater than `fast`
/// * `signal` - Signal EMA period (usually 9)
pub fn calculate_macd(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Vec<MacdPoint> {
    if fast == 0 || signal == 0 || fast >= slow || candles.len() < slow + signal {
        return Vec::new();
    }

    let prices = closes(candles);
    let fast_ema = ema_values(&prices, fast);
    let slow_ema = ema_values(&prices, slow);

    // slow_ema[j] belongs to candle slow-1+j; fast_ema is offset by slow-fast
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(j, slow_value)| fast_ema[j + offset] - slow_value)
        .collect();

    let signal_line = ema_values(&macd_line, signal);
    let first_candle = slow - 1 + signal - 1;

    signal_line
        .iter()
        .enumerate()
        .map(|(k, signal_value)| {
            let macd = macd_line[k + signal - 1];
            MacdPoint {
                timestamp: candles[first_candle + k].timestamp,
                macd,
                signal: *signal_value,
                histogram: macd - signal_value,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_candles;

    fn wave(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 1000.0 + (i as f64 / 5.0).sin() * 50.0 + i as f64)
            .collect()
    }

    #[test]
    fn test_macd_histogram_is_difference() {
        let candles = test_candles(&wave(120));
        let macd = calculate_macd(&candles, 12, 26, 9);
        assert!(!macd.is_empty());
        for point in &macd {
            assert!((point.histogram - (point.macd - point.signal)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_macd_alignment() {
        let candles = test_candles(&wave(60));
        let macd = calculate_macd(&candles, 12, 26, 9);
        // first point at index 26-1 + 9-1 = 33
        assert_eq!(macd.len(), 60 - 33);
        assert_eq!(macd[0].timestamp, candles[33].timestamp);
        assert_eq!(macd.last().unwrap().timestamp, candles[59].timestamp);
    }

    #[test]
    fn test_macd_insufficient_data() {
        let candles = test_candles(&wave(34));
        assert!(calculate_macd(&candles, 12, 26, 9).is_empty());
        let candles = test_candles(&wave(35));
        assert_eq!(calculate_macd(&candles, 12, 26, 9).len(), 2);
    }

    #[test]
    fn test_macd_rejects_inverted_periods() {
        let candles = test_candles(&wave(100));
        assert!(calculate_macd(&candles, 26, 12, 9).is_empty());
    }

    #[test]
    fn test_macd_flat_prices() {
        let candles = test_candles(&[100.0; 50]);
        let macd = calculate_macd(&candles, 12, 26, 9);
        assert!(macd.iter().all(|p| p.macd.abs() < 1e-9 && p.histogram.abs() < 1e-9));
    }
}

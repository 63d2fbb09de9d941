// Technical indicators module
// Pure functions over candle sequences: RSI, SMA/EMA, MACD, Bollinger Bands

pub mod bollinger;
pub mod macd;
pub mod moving_average;
pub mod rsi;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Candle;

pub use bollinger::{calculate_bollinger_bands, percent_b, BollingerPoint};
pub use macd::{calculate_macd, MacdPoint};
pub use moving_average::{calculate_ema, calculate_sma, ema_values, sma_values};
pub use rsi::{calculate_rsi, rsi_values};

/// Timestamped scalar indicator value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Attach candle timestamps to a warm-up-shortened series.
///
/// Every series ends on the last candle, so values line up with the tail.
fn align(candles: &[Candle], values: Vec<f64>) -> Vec<IndicatorPoint> {
    let offset = candles.len().saturating_sub(values.len());
    values
        .into_iter()
        .zip(&candles[offset..])
        .map(|(value, candle)| IndicatorPoint {
            timestamp: candle.timestamp,
            value,
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn test_candles(prices: &[f64]) -> Vec<Candle> {
    use chrono::TimeZone;

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            Candle::new(
                start + chrono::Duration::hours(i as i64),
                p,
                p,
                p,
                p,
                1.0,
            )
        })
        .collect()
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerPoint {
    pub timestamp: DateTime<Utc>,
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerPoint {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Calculate Bollinger Bands
///
/// Middle band is the SMA of `period` closes; the outer bands sit
/// `multiplier` population standard deviations away from it.
pub fn calculate_bollinger_bands(
    candles: &[Candle],
    period: usize,
    multiplier: f64,
) -> Vec<BollingerPoint> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }

    candles
        .windows(period)
        .map(|window| {
            let n = period as f64;
            let middle = window.iter().map(|c| c.close).sum::<f64>() / n;
            let variance = window
                .iter()
                .map(|c| (c.close - middle).powi(2))
                .sum::<f64>()
                / n;
            let band = multiplier * variance.sqrt();

            BollingerPoint {
                timestamp: window[period - 1].timestamp,
                upper: middle + band,
                middle,
                lower: middle - band,
            }
        })
        .collect()
}

/// %B: where the close sits inside the bands (0 = lower, 1 = upper)
///
/// Returns 0.5 when the bands have collapsed.
pub fn percent_b(close: f64, bands: &BollingerPoint) -> f64 {
    let width = bands.width();
    if width == 0.0 {
        return 0.5;
    }
    (close - bands.lower) / width
}

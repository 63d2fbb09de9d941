use super::{align, IndicatorPoint};
use crate::models::{closes, Candle};

/// Calculate Relative Strength Index (RSI) over raw closes
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions. The first average gain/loss is the
/// simple mean of the first `period` deltas; later values use Wilder
/// smoothing.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// The first output lines up with `prices[period]`.
pub fn rsi_values(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period + 1 {
        return Vec::new();
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += change.abs();
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let mut out = Vec::with_capacity(prices.len() - period);
    out.push(rsi_from_averages(avg_gain, avg_loss));

    let p = period as f64;
    for i in (period + 1)..prices.len() {
        let change = prices[i] - prices[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, change.abs())
        };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        out.push(rsi_from_averages(avg_gain, avg_loss));
    }

    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// RSI series over candle closes
pub fn calculate_rsi(candles: &[Candle], period: usize) -> Vec<IndicatorPoint> {
    align(candles, rsi_values(&closes(candles), period))
}

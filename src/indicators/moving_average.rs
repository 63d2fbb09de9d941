use super::{align, IndicatorPoint};
use crate::models::{closes, Candle};

/// Rolling simple mean over raw values
///
/// Output `i` covers `values[i..i + period]`, so the series is
/// `period - 1` elements shorter than the input.
pub fn sma_values(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut sum: f64 = values[..period].iter().sum();
    out.push(sum / period as f64);

    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out.push(sum / period as f64);
    }

    out
}

/// Exponential moving average over raw values, seeded with the SMA of the
/// first `period` values
pub fn ema_values(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(ema);
    for value in &values[period..] {
        ema = (value - ema) * multiplier + ema;
        out.push(ema);
    }

    out
}

/// Calculate Simple Moving Average (SMA) of closes
pub fn calculate_sma(candles: &[Candle], period: usize) -> Vec<IndicatorPoint> {
    align(candles, sma_values(&closes(candles), period))
}

/// Calculate Exponential Moving Average (EMA) of closes
pub fn calculate_ema(candles: &[Candle], period: usize) -> Vec<IndicatorPoint> {
    align(candles, ema_values(&closes(candles), period))
}

//! Crossover detectors shared by every strategy.
//!
//! Each detector maps aligned indicator series to one [`Direction`] per
//! element. The first element is always `Hold`; a directional value only
//! appears on the element where the crossing happens, so a monotone run on
//! one side of the threshold never repeats a signal.

use super::Direction;

/// Oscillator leaving an extreme zone (RSI style)
///
/// Buy when the value rises through `oversold` (prev <= oversold < curr),
/// sell when it falls through `overbought` (prev >= overbought > curr).
pub fn threshold_cross(values: &[f64], overbought: f64, oversold: f64) -> Vec<Direction> {
    pairwise(values.len(), |i| {
        let (prev, curr) = (values[i - 1], values[i]);
        if prev <= oversold && curr > oversold {
            Direction::Buy
        } else if prev >= overbought && curr < overbought {
            Direction::Sell
        } else {
            Direction::Hold
        }
    })
}

/// Sign change of a series around zero (MACD histogram)
pub fn zero_cross(values: &[f64]) -> Vec<Direction> {
    pairwise(values.len(), |i| {
        let (prev, curr) = (values[i - 1], values[i]);
        if prev <= 0.0 && curr > 0.0 {
            Direction::Buy
        } else if prev >= 0.0 && curr < 0.0 {
            Direction::Sell
        } else {
            Direction::Hold
        }
    })
}

/// Fast line crossing a slow line (golden cross / dead cross)
///
/// Both slices must be aligned on the same timestamps.
pub fn line_cross(fast: &[f64], slow: &[f64]) -> Vec<Direction> {
    let len = fast.len().min(slow.len());
    pairwise(len, |i| {
        let (prev_fast, prev_slow) = (fast[i - 1], slow[i - 1]);
        let (curr_fast, curr_slow) = (fast[i], slow[i]);
        if prev_fast <= prev_slow && curr_fast > curr_slow {
            Direction::Buy
        } else if prev_fast >= prev_slow && curr_fast < curr_slow {
            Direction::Sell
        } else {
            Direction::Hold
        }
    })
}

/// Price re-entering the bands after touching or breaking one of them
pub fn band_reentry(closes: &[f64], lower: &[f64], upper: &[f64]) -> Vec<Direction> {
    let len = closes.len().min(lower.len()).min(upper.len());
    pairwise(len, |i| {
        let (prev, curr) = (closes[i - 1], closes[i]);
        if prev <= lower[i - 1] && curr > lower[i] {
            Direction::Buy
        } else if prev >= upper[i - 1] && curr < upper[i] {
            Direction::Sell
        } else {
            Direction::Hold
        }
    })
}

fn pairwise(len: usize, detect: impl Fn(usize) -> Direction) -> Vec<Direction> {
    let mut out = Vec::with_capacity(len);
    if len == 0 {
        return out;
    }
    out.push(Direction::Hold);
    for i in 1..len {
        out.push(detect(i));
    }
    out
}

// Trading strategy module
pub mod bollinger;
pub mod ma_crossover;
pub mod macd;
pub mod rsi;
pub mod signals;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::models::Candle;

pub use bollinger::BollingerStrategy;
pub use ma_crossover::MaCrossoverStrategy;
pub use macd::MacdStrategy;
pub use rsi::RsiStrategy;

/// Trade direction for a single timestamp (1 / -1 / 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
    #[serde(rename = "none")]
    Hold,
}

impl Direction {
    pub fn as_i8(&self) -> i8 {
        match self {
            Direction::Buy => 1,
            Direction::Sell => -1,
            Direction::Hold => 0,
        }
    }
}

/// Direction of a strategy at one candle timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalPoint {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
}

/// Directional trade recommendation, emitted only where a crossing happens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    /// Heuristic confidence, always within [0, 100]
    pub strength: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub indicators: BTreeMap<String, f64>,
}

/// Base trait for all trading strategies
///
/// Implementations are pure: the same candles always give the same
/// signals, which is what lets the backtest replay the live pipeline.
pub trait Strategy: Send + Sync {
    /// Get strategy name
    fn name(&self) -> &'static str;

    /// Minimum candles required before any signal can appear
    fn min_candles_required(&self) -> usize;

    /// One direction per timestamp where the indicators are defined
    fn signal_series(&self, candles: &[Candle]) -> Vec<SignalPoint>;

    /// Signal records for every crossing in the window, oldest first
    fn generate_signals(&self, symbol: &str, candles: &[Candle]) -> Vec<Signal>;

    /// Signal on the most recent candle, if it is a crossing
    fn latest_signal(&self, symbol: &str, candles: &[Candle]) -> Option<Signal> {
        let last = candles.last()?;
        self.generate_signals(symbol, candles)
            .into_iter()
            .next_back()
            .filter(|s| s.timestamp == last.timestamp)
    }
}

/// Closed set of supported strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Rsi,
    Macd,
    MaCrossover,
    Bollinger,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Rsi => "rsi",
            StrategyKind::Macd => "macd",
            StrategyKind::MaCrossover => "ma_crossover",
            StrategyKind::Bollinger => "bollinger",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rsi" => Ok(StrategyKind::Rsi),
            "macd" => Ok(StrategyKind::Macd),
            "ma_crossover" => Ok(StrategyKind::MaCrossover),
            "bollinger" => Ok(StrategyKind::Bollinger),
            other => Err(format!("unknown strategy type: {}", other)),
        }
    }
}

/// A strategy type together with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Rsi(RsiStrategy),
    Macd(MacdStrategy),
    MaCrossover(MaCrossoverStrategy),
    Bollinger(BollingerStrategy),
}

impl StrategyConfig {
    /// Build a config from a type name and a JSON parameter object.
    ///
    /// Unknown types and malformed parameters produce no strategy; both are
    /// logged so a misconfigured instance is visible without stopping the
    /// others.
    pub fn from_parts(strategy_type: &str, params: &serde_json::Value) -> Option<Self> {
        let kind = match strategy_type.parse::<StrategyKind>() {
            Ok(kind) => kind,
            Err(_) => {
                tracing::warn!(strategy_type, "Unknown strategy type, no signals will be generated");
                return None;
            }
        };

        let params = if params.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            params.clone()
        };

        let parsed = match kind {
            StrategyKind::Rsi => serde_json::from_value(params).map(StrategyConfig::Rsi),
            StrategyKind::Macd => serde_json::from_value(params).map(StrategyConfig::Macd),
            StrategyKind::MaCrossover => {
                serde_json::from_value(params).map(StrategyConfig::MaCrossover)
            }
            StrategyKind::Bollinger => {
                serde_json::from_value(params).map(StrategyConfig::Bollinger)
            }
        };

        match parsed {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(strategy_type, error = %e, "Invalid strategy parameters");
                None
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyConfig::Rsi(_) => StrategyKind::Rsi,
            StrategyConfig::Macd(_) => StrategyKind::Macd,
            StrategyConfig::MaCrossover(_) => StrategyKind::MaCrossover,
            StrategyConfig::Bollinger(_) => StrategyKind::Bollinger,
        }
    }

    pub fn as_strategy(&self) -> &dyn Strategy {
        match self {
            StrategyConfig::Rsi(s) => s,
            StrategyConfig::Macd(s) => s,
            StrategyConfig::MaCrossover(s) => s,
            StrategyConfig::Bollinger(s) => s,
        }
    }
}

/// Clamp a strength heuristic into [0, 100]; NaN maps to 0
pub(crate) fn clamp_strength(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Build signal records from a direction series aligned with the tail of
/// `candles`
pub(crate) fn build_signals(
    symbol: &str,
    candles: &[Candle],
    directions: &[Direction],
    mut describe: impl FnMut(usize, Direction) -> (f64, String, BTreeMap<String, f64>),
) -> Vec<Signal> {
    let offset = candles.len().saturating_sub(directions.len());
    directions
        .iter()
        .enumerate()
        .filter(|(_, d)| **d != Direction::Hold)
        .map(|(i, direction)| {
            let candle = &candles[offset + i];
            let (strength, reason, indicators) = describe(i, *direction);
            Signal {
                symbol: symbol.to_string(),
                direction: *direction,
                strength: clamp_strength(strength),
                price: candle.close,
                timestamp: candle.timestamp,
                reason,
                indicators,
            }
        })
        .collect()
}

pub(crate) fn series_points(candles: &[Candle], directions: &[Direction]) -> Vec<SignalPoint> {
    let offset = candles.len().saturating_sub(directions.len());
    directions
        .iter()
        .zip(&candles[offset..])
        .map(|(direction, candle)| SignalPoint {
            timestamp: candle.timestamp,
            direction: *direction,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_parts_with_defaults() {
        let config = StrategyConfig::from_parts("rsi", &json!({})).unwrap();
        assert_eq!(config, StrategyConfig::Rsi(RsiStrategy::default()));
        assert_eq!(config.kind(), StrategyKind::Rsi);
    }

    #[test]
    fn test_from_parts_reads_camel_case_params() {
        let config = StrategyConfig::from_parts(
            "ma_crossover",
            &json!({ "shortPeriod": 5, "longPeriod": 20, "useEMA": true }),
        )
        .unwrap();
        match config {
            StrategyConfig::MaCrossover(s) => {
                assert_eq!(s.short_period, 5);
                assert_eq!(s.long_period, 20);
                assert!(s.use_ema);
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_unknown_strategy_type_is_none() {
        assert!(StrategyConfig::from_parts("ichimoku", &json!({})).is_none());
    }

    #[test]
    fn test_malformed_params_is_none() {
        assert!(StrategyConfig::from_parts("macd", &json!({ "fastPeriod": "fast" })).is_none());
    }

    #[test]
    fn test_tagged_serde_form() {
        let config: StrategyConfig =
            serde_json::from_value(json!({ "type": "bollinger", "period": 10 })).unwrap();
        match config {
            StrategyConfig::Bollinger(b) => {
                assert_eq!(b.period, 10);
                assert_eq!(b.multiplier, 2.0);
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_clamp_strength() {
        assert_eq!(clamp_strength(150.0), 100.0);
        assert_eq!(clamp_strength(-3.0), 0.0);
        assert_eq!(clamp_strength(f64::NAN), 0.0);
        assert_eq!(clamp_strength(f64::INFINITY), 100.0);
    }

    #[test]
    fn test_direction_values() {
        assert_eq!(Direction::Buy.as_i8(), 1);
        assert_eq!(Direction::Sell.as_i8(), -1);
        assert_eq!(Direction::Hold.as_i8(), 0);
        assert_eq!(serde_json::to_string(&Direction::Hold).unwrap(), "\"none\"");
    }
}

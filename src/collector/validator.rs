use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::Candle;

/// Why a candle was refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleError {
    #[error("Invalid {field} price: {value}")]
    NonPositivePrice { field: &'static str, value: f64 },

    #[error("Invalid volume: {0}")]
    NegativeVolume(f64),

    #[error("Candle timestamp is in the future: {timestamp} (now: {now})")]
    FutureTimestamp {
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("High ({high}) is less than {field} ({value})")]
    HighTooLow {
        high: f64,
        field: &'static str,
        value: f64,
    },

    #[error("Low ({low}) is greater than {field} ({value})")]
    LowTooHigh {
        low: f64,
        field: &'static str,
        value: f64,
    },
}

/// Validates OHLCV candles coming back from an exchange
#[derive(Debug, Default, Clone, Copy)]
pub struct CandleValidator;

impl CandleValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, candle: &Candle) -> Result<(), CandleError> {
        self.validate_prices(candle)?;
        self.validate_timestamp(candle, Utc::now())?;
        self.validate_ohlc_relationship(candle)?;
        Ok(())
    }

    fn validate_prices(&self, candle: &Candle) -> Result<(), CandleError> {
        for (field, value) in [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
        ] {
            // also rejects NaN
            if !(value > 0.0) {
                return Err(CandleError::NonPositivePrice { field, value });
            }
        }
        // zero volume is normal for quiet minutes
        if candle.volume < 0.0 {
            return Err(CandleError::NegativeVolume(candle.volume));
        }
        Ok(())
    }

    fn validate_timestamp(&self, candle: &Candle, now: DateTime<Utc>) -> Result<(), CandleError> {
        if candle.timestamp > now {
            return Err(CandleError::FutureTimestamp {
                timestamp: candle.timestamp,
                now,
            });
        }
        Ok(())
    }

    fn validate_ohlc_relationship(&self, candle: &Candle) -> Result<(), CandleError> {
        for (field, value) in [("low", candle.low), ("open", candle.open), ("close", candle.close)] {
            if candle.high < value {
                return Err(CandleError::HighTooLow {
                    high: candle.high,
                    field,
                    value,
                });
            }
        }
        for (field, value) in [("open", candle.open), ("close", candle.close)] {
            if candle.low > value {
                return Err(CandleError::LowTooHigh {
                    low: candle.low,
                    field,
                    value,
                });
            }
        }
        Ok(())
    }

    /// Keep the valid candles, logging each one that is dropped
    pub fn retain_valid(&self, market: &str, candles: Vec<Candle>) -> Vec<Candle> {
        candles
            .into_iter()
            .filter(|candle| match self.validate(candle) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(market, timestamp = %candle.timestamp, error = %e, "Skipping invalid candle");
                    false
                }
            })
            .collect()
    }
}

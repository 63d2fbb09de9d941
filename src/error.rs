use thiserror::Error;
use uuid::Uuid;

use crate::execution::OrderStatus;
use crate::risk::RiskCheck;

/// Every failure the trading core can surface to a caller
#[derive(Debug, Error)]
pub enum TradingError {
    /// Fewer candles than the indicator or simulator warm-up needs
    #[error("insufficient data: {required} candles required, {available} available")]
    InsufficientData { required: usize, available: usize },

    /// A pre-trade risk check failed; the order was never created
    #[error("risk check {check} failed: {reason}")]
    RiskRejected { check: RiskCheck, reason: String },

    /// Network or timeout failure talking to the exchange (retryable)
    #[error("exchange transient error: {0}")]
    ExchangeTransient(String),

    /// Exchange refused the request for good (bad credentials, invalid order)
    #[error("exchange fatal error: {0}")]
    ExchangeFatal(String),

    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("no position for account {account_id} on {symbol}")]
    PositionNotFound { account_id: String, symbol: String },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TradingError {
    /// Whether the task queue should try the operation again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradingError::ExchangeTransient(_) | TradingError::Storage(_)
        )
    }
}

impl From<sqlx::Error> for TradingError {
    fn from(e: sqlx::Error) -> Self {
        TradingError::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for TradingError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        TradingError::Storage(e.to_string())
    }
}

impl From<redis::RedisError> for TradingError {
    fn from(e: redis::RedisError) -> Self {
        TradingError::Storage(e.to_string())
    }
}

impl From<config::ConfigError> for TradingError {
    fn from(e: config::ConfigError) -> Self {
        TradingError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TradingError::ExchangeTransient("timeout".into()).is_retryable());
        assert!(TradingError::Storage("connection reset".into()).is_retryable());
        assert!(!TradingError::ExchangeFatal("invalid api key".into()).is_retryable());
        assert!(!TradingError::OrderNotFound(Uuid::new_v4()).is_retryable());
        assert!(!TradingError::InsufficientData {
            required: 100,
            available: 10
        }
        .is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = TradingError::InsufficientData {
            required: 100,
            available: 42,
        };
        assert_eq!(
            err.to_string(),
            "insufficient data: 100 candles required, 42 available"
        );

        let err = TradingError::RiskRejected {
            check: RiskCheck::OrderSize,
            reason: "too big".into(),
        };
        assert_eq!(err.to_string(), "risk check orderSize failed: too big");
    }
}
